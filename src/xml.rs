//! Resource-agent descriptor rendering.
//!
//! The resource manager asks every agent for a `meta-data` document that
//! lists its parameters and supported actions.  This module produces it
//! with `quick-xml`.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::io::Cursor;

/// Agent name as registered with the resource manager.
pub const AGENT_NAME: &str = "gcp-vpc-move-vip";

/// One tunable the agent accepts.
struct Parameter {
    name: &'static str,
    unique: bool,
    required: bool,
    longdesc: &'static str,
    shortdesc: &'static str,
    content_type: &'static str,
}

const PARAMETERS: &[Parameter] = &[
    Parameter {
        name: "alias_ip",
        unique: true,
        required: true,
        longdesc: "IP Address to be added including CIDR. E.g 192.168.0.1/32",
        shortdesc: "IP Address to be added including CIDR. E.g 192.168.0.1/32",
        content_type: "string",
    },
    Parameter {
        name: "alias_range_name",
        unique: true,
        required: false,
        longdesc: "Subnet name for the Alias IP",
        shortdesc: "Subnet name for the Alias IP",
        content_type: "string",
    },
    Parameter {
        name: "hostlist",
        unique: true,
        required: false,
        longdesc: "List of hosts in the cluster",
        shortdesc: "Host list",
        content_type: "string",
    },
    Parameter {
        name: "stackdriver_logging",
        unique: false,
        required: false,
        longdesc: "If enabled (set to true), IP failover logs are emitted as structured JSON lines for forwarding to Stackdriver logging.",
        shortdesc: "Stackdriver-logging support.",
        content_type: "boolean",
    },
];

/// `(name, timeout, extra attributes)`
const ACTIONS: &[(&str, &str, &[(&str, &str)])] = &[
    ("start", "300s", &[]),
    ("stop", "15s", &[]),
    ("monitor", "15s", &[("interval", "60s"), ("depth", "0")]),
    ("meta-data", "15s", &[]),
    ("validate-all", "15s", &[]),
];

/// Render the `<resource-agent>` descriptor.
///
/// ```xml
/// <?xml version="1.0"?>
/// <!DOCTYPE resource-agent SYSTEM "ra-api-1.dtd">
/// <resource-agent name="gcp-vpc-move-vip">
///   <version>1.0</version>
///   ...
/// </resource-agent>
/// ```
pub fn render_metadata() -> String {
    let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", None, None)))
        .expect("xml decl");
    writer
        .write_event(Event::DocType(BytesText::from_escaped(
            "resource-agent SYSTEM \"ra-api-1.dtd\"",
        )))
        .expect("doctype");

    let root = BytesStart::new("resource-agent").with_attributes([("name", AGENT_NAME)]);
    writer.write_event(Event::Start(root)).expect("start root");

    write_text_element(&mut writer, "version", &[], "1.0");
    write_text_element(
        &mut writer,
        "longdesc",
        &[("lang", "en")],
        "Floating IP Address on Google Cloud Platform - Using Alias IP address functionality to attach a secondary IP address to a running instance",
    );
    write_text_element(
        &mut writer,
        "shortdesc",
        &[("lang", "en")],
        "Floating IP Address on Google Cloud Platform",
    );

    writer
        .write_event(Event::Start(BytesStart::new("parameters")))
        .expect("start parameters");
    for param in PARAMETERS {
        write_parameter(&mut writer, param);
    }
    writer
        .write_event(Event::End(BytesEnd::new("parameters")))
        .expect("end parameters");

    writer
        .write_event(Event::Start(BytesStart::new("actions")))
        .expect("start actions");
    for (name, timeout, extra) in ACTIONS {
        let action = BytesStart::new("action")
            .with_attributes([("name", *name), ("timeout", *timeout)])
            .with_attributes(extra.iter().copied());
        writer.write_event(Event::Empty(action)).expect("action");
    }
    writer
        .write_event(Event::End(BytesEnd::new("actions")))
        .expect("end actions");

    writer
        .write_event(Event::End(BytesEnd::new("resource-agent")))
        .expect("end root");

    String::from_utf8(writer.into_inner().into_inner()).expect("valid utf-8")
}

fn write_parameter(writer: &mut Writer<Cursor<Vec<u8>>>, param: &Parameter) {
    let flag = |b: bool| if b { "1" } else { "0" };
    let start = BytesStart::new("parameter").with_attributes([
        ("name", param.name),
        ("unique", flag(param.unique)),
        ("required", flag(param.required)),
    ]);
    writer.write_event(Event::Start(start)).expect("start parameter");

    write_text_element(writer, "longdesc", &[("lang", "en")], param.longdesc);
    write_text_element(writer, "shortdesc", &[("lang", "en")], param.shortdesc);
    let content = BytesStart::new("content")
        .with_attributes([("type", param.content_type), ("default", "")]);
    writer.write_event(Event::Empty(content)).expect("content");

    writer
        .write_event(Event::End(BytesEnd::new("parameter")))
        .expect("end parameter");
}

/// Write `<tag attrs...>text</tag>`.
fn write_text_element(
    writer: &mut Writer<Cursor<Vec<u8>>>,
    tag: &str,
    attributes: &[(&str, &str)],
    text: &str,
) {
    let start = BytesStart::new(tag).with_attributes(attributes.iter().copied());
    writer.write_event(Event::Start(start)).expect("start tag");
    writer
        .write_event(Event::Text(BytesText::new(text)))
        .expect("text");
    writer
        .write_event(Event::End(BytesEnd::new(tag)))
        .expect("end tag");
}
