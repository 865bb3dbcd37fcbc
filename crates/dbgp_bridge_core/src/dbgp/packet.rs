use crate::{BridgeError, Result};
use roxmltree::{Document, Node};
use serde::Serialize;

use super::{strip_file_uri, TransactionId};

/// One decoded packet from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Init(InitPacket),
    Stream(StreamPacket),
    Response(Response),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitPacket {
    pub file: String,
    pub language: Option<String>,
    pub idekey: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StreamPacket {
    pub kind: StreamKind,
    pub base64: bool,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub command: String,
    pub transaction_id: Option<TransactionId>,
    /// Set when the engine rejected the command.
    pub error: Option<EngineFault>,
    pub kind: ResponseKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResponseKind {
    /// run, step_over, step_into, step_out
    Continuation {
        status: Option<String>,
        message: Option<BreakMessage>,
    },
    Eval(std::result::Result<Property, EngineFault>),
    ContextNames(Vec<ContextName>),
    ContextGet {
        /// Echo of `-c`; not every engine sends it.
        context_id: Option<String>,
        properties: Vec<Property>,
    },
    StackGet(Vec<StackFrame>),
    BreakpointSet {
        id: Option<String>,
    },
    BreakpointRemove,
    Other,
}

/// The `xdebug:message` child of a break response.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakMessage {
    pub file: String,
    pub line: u32,
    pub exception: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineFault {
    pub code: u32,
    pub message: String,
}

impl From<EngineFault> for BridgeError {
    fn from(fault: EngineFault) -> Self {
        BridgeError::Engine {
            code: fault.code,
            message: fault.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextName {
    pub id: String,
    pub name: String,
}

/// Immutable snapshot of one call frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StackFrame {
    pub depth: u32,
    #[serde(rename = "where")]
    pub label: String,
    pub file: String,
    pub line: u32,
}

/// A variable/value descriptor as reported by the engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Property {
    pub name: Option<String>,
    pub fullname: Option<String>,
    pub kind: Option<String>,
    pub classname: Option<String>,
    pub encoding: Option<String>,
    pub num_children: Option<usize>,
    pub value: String,
    pub children: Vec<Property>,
}

impl Property {
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.fullname.as_deref())
            .unwrap_or("?")
    }
}

impl EnginePacket {
    pub fn parse(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml)?;
        let root = doc.root_element();

        match root.tag_name().name() {
            "init" => Ok(Self::Init(parse_init(root)?)),
            "stream" => Ok(Self::Stream(parse_stream(root)?)),
            "response" => Ok(Self::Response(parse_response(root)?)),
            other => Err(BridgeError::invalid_packet(format!(
                "unexpected root element <{other}>"
            ))),
        }
    }
}

fn parse_init(node: Node) -> Result<InitPacket> {
    let file = node
        .attribute("fileuri")
        .ok_or_else(|| BridgeError::invalid_packet("init packet missing fileuri"))?;

    Ok(InitPacket {
        file: strip_file_uri(file).to_string(),
        language: node.attribute("language").map(str::to_string),
        idekey: node.attribute("idekey").map(str::to_string),
    })
}

fn parse_stream(node: Node) -> Result<StreamPacket> {
    let kind = match node.attribute("type") {
        Some("stdout") => StreamKind::Stdout,
        Some("stderr") => StreamKind::Stderr,
        other => {
            return Err(BridgeError::invalid_packet(format!(
                "unknown stream type {other:?}"
            )))
        }
    };

    Ok(StreamPacket {
        kind,
        base64: node.attribute("encoding") == Some("base64"),
        text: own_text(node),
    })
}

fn parse_response(node: Node) -> Result<Response> {
    let command = node.attribute("command").unwrap_or_default().to_string();
    let transaction_id = node
        .attribute("transaction_id")
        .and_then(|v| v.parse::<TransactionId>().ok());

    let kind = match command.as_str() {
        "run" | "step_over" | "step_into" | "step_out" => ResponseKind::Continuation {
            status: node.attribute("status").map(str::to_string),
            message: child_element(node, "message")
                .map(parse_break_message)
                .transpose()?,
        },
        "eval" => ResponseKind::Eval(parse_eval(node)),
        "context_names" => ResponseKind::ContextNames(
            child_elements(node, "context")
                .map(|c| ContextName {
                    id: c.attribute("id").unwrap_or_default().to_string(),
                    name: c.attribute("name").unwrap_or_default().to_string(),
                })
                .collect(),
        ),
        "context_get" => ResponseKind::ContextGet {
            context_id: node.attribute("context").map(str::to_string),
            properties: child_elements(node, "property").map(parse_property).collect(),
        },
        "stack_get" => {
            let mut frames = child_elements(node, "stack")
                .map(parse_stack_frame)
                .collect::<Result<Vec<_>>>()?;
            frames.sort_by_key(|f| f.depth);
            ResponseKind::StackGet(frames)
        }
        "breakpoint_set" => ResponseKind::BreakpointSet {
            id: node.attribute("id").map(str::to_string),
        },
        "breakpoint_remove" => ResponseKind::BreakpointRemove,
        _ => ResponseKind::Other,
    };

    Ok(Response {
        command,
        transaction_id,
        error: child_element(node, "error").map(parse_fault),
        kind,
    })
}

fn parse_break_message(node: Node) -> Result<BreakMessage> {
    let file = node
        .attribute("filename")
        .ok_or_else(|| BridgeError::invalid_packet("break message missing filename"))?;
    let line = parse_number(node, "lineno")?;

    Ok(BreakMessage {
        file: strip_file_uri(file).to_string(),
        line,
        exception: node.attribute("exception").map(str::to_string),
        text: own_text(node).trim().to_string(),
    })
}

fn parse_eval(node: Node) -> std::result::Result<Property, EngineFault> {
    if let Some(error) = child_element(node, "error") {
        return Err(parse_fault(error));
    }

    child_element(node, "property")
        .map(parse_property)
        .ok_or_else(|| EngineFault {
            code: 0,
            message: "eval returned no value".to_string(),
        })
}

fn parse_fault(error: Node) -> EngineFault {
    EngineFault {
        code: error
            .attribute("code")
            .and_then(|c| c.parse().ok())
            .unwrap_or(0),
        message: child_element(error, "message")
            .map(own_text)
            .unwrap_or_else(|| "unknown engine error".to_string()),
    }
}

fn parse_stack_frame(node: Node) -> Result<StackFrame> {
    Ok(StackFrame {
        depth: parse_number(node, "level")?,
        label: node.attribute("where").unwrap_or_default().to_string(),
        file: strip_file_uri(node.attribute("filename").unwrap_or_default()).to_string(),
        line: parse_number(node, "lineno")?,
    })
}

fn parse_property(node: Node) -> Property {
    Property {
        name: node.attribute("name").map(str::to_string),
        fullname: node.attribute("fullname").map(str::to_string),
        kind: node.attribute("type").map(str::to_string),
        classname: node.attribute("classname").map(str::to_string),
        encoding: node.attribute("encoding").map(str::to_string),
        num_children: node.attribute("numchildren").and_then(|n| n.parse().ok()),
        value: own_text(node),
        children: child_elements(node, "property").map(parse_property).collect(),
    }
}

fn parse_number(node: Node, attribute: &str) -> Result<u32> {
    let raw = node.attribute(attribute).ok_or_else(|| {
        BridgeError::invalid_packet(format!(
            "<{}> missing {attribute}",
            node.tag_name().name()
        ))
    })?;
    raw.trim().parse().map_err(|e| {
        BridgeError::invalid_packet(format!("invalid {attribute} value {raw:?}: {e}"))
    })
}

// Element names are matched by local name, which makes the engine's
// `xdebug:` namespace prefix transparent.
fn child_elements<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children()
        .filter(move |c| c.is_element() && c.tag_name().name() == name)
}

fn child_element<'a, 'input: 'a>(node: Node<'a, 'input>, name: &'a str) -> Option<Node<'a, 'input>> {
    child_elements(node, name).next()
}

fn own_text(node: Node) -> String {
    node.children()
        .filter(|c| c.is_text())
        .filter_map(|c| c.text())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const XMLNS: &str = r#"xmlns="urn:debugger_protocol_v1" xmlns:xdebug="https://xdebug.org/dbgp/xdebug""#;

    fn response(body: &str) -> Response {
        match EnginePacket::parse(body).expect("fixture should parse") {
            EnginePacket::Response(r) => r,
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_init_strips_file_uri() {
        let xml = format!(
            r#"<?xml version="1.0" encoding="iso-8859-1"?>
<init {XMLNS} fileuri="file:///var/www/index.php" language="PHP" idekey="dbgp"></init>"#
        );
        let packet = EnginePacket::parse(&xml).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Init(InitPacket {
                file: "/var/www/index.php".to_string(),
                language: Some("PHP".to_string()),
                idekey: Some("dbgp".to_string()),
            })
        );
    }

    #[test]
    fn test_parse_stream() {
        let xml = format!(r#"<stream {XMLNS} type="stdout" encoding="base64"><![CDATA[SGVsbG8=]]></stream>"#);
        let packet = EnginePacket::parse(&xml).unwrap();
        assert_eq!(
            packet,
            EnginePacket::Stream(StreamPacket {
                kind: StreamKind::Stdout,
                base64: true,
                text: "SGVsbG8=".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_unknown_stream_type_fails() {
        let xml = format!(r#"<stream {XMLNS} type="stdin">x</stream>"#);
        assert!(matches!(
            EnginePacket::parse(&xml),
            Err(BridgeError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_parse_break_with_exception() {
        let r = response(&format!(
            r#"<response {XMLNS} command="run" transaction_id="4" status="break" reason="ok"><xdebug:message filename="file:///a.php" lineno="10" exception="Exception"><![CDATA[boom]]></xdebug:message></response>"#
        ));
        assert_eq!(r.command, "run");
        assert_eq!(r.transaction_id, Some(4));
        assert_eq!(
            r.kind,
            ResponseKind::Continuation {
                status: Some("break".to_string()),
                message: Some(BreakMessage {
                    file: "/a.php".to_string(),
                    line: 10,
                    exception: Some("Exception".to_string()),
                    text: "boom".to_string(),
                }),
            }
        );
    }

    #[test]
    fn test_parse_break_with_bad_lineno_fails() {
        let xml = format!(
            r#"<response {XMLNS} command="step_over" transaction_id="4" status="break"><xdebug:message filename="file:///a.php" lineno="ten"/></response>"#
        );
        assert!(matches!(
            EnginePacket::parse(&xml),
            Err(BridgeError::InvalidPacket(_))
        ));
    }

    #[test]
    fn test_parse_stopping_without_message() {
        let r = response(&format!(
            r#"<response {XMLNS} command="run" transaction_id="9" status="stopping" reason="ok"/>"#
        ));
        assert_eq!(
            r.kind,
            ResponseKind::Continuation {
                status: Some("stopping".to_string()),
                message: None,
            }
        );
    }

    #[test]
    fn test_parse_context_names() {
        let r = response(&format!(
            r#"<response {XMLNS} command="context_names" transaction_id="5"><context name="Locals" id="0"/><context name="Superglobals" id="1"/></response>"#
        ));
        assert_eq!(
            r.kind,
            ResponseKind::ContextNames(vec![
                ContextName { id: "0".to_string(), name: "Locals".to_string() },
                ContextName { id: "1".to_string(), name: "Superglobals".to_string() },
            ])
        );
    }

    #[test]
    fn test_parse_context_get_with_nested_properties() {
        let r = response(&format!(
            r#"<response {XMLNS} command="context_get" transaction_id="6" context="1"><property name="$a" fullname="$a" type="array" children="1" numchildren="1"><property name="0" fullname="$a[0]" type="int"><![CDATA[7]]></property></property></response>"#
        ));
        let ResponseKind::ContextGet { context_id, properties } = r.kind else {
            panic!("expected context_get");
        };
        assert_eq!(context_id.as_deref(), Some("1"));
        assert_eq!(properties.len(), 1);
        assert_eq!(properties[0].kind.as_deref(), Some("array"));
        assert_eq!(properties[0].num_children, Some(1));
        assert_eq!(properties[0].children[0].value, "7");
        assert_eq!(properties[0].children[0].display_name(), "0");
    }

    #[test]
    fn test_parse_stack_get_sorted_by_depth() {
        let r = response(&format!(
            r#"<response {XMLNS} command="stack_get" transaction_id="7"><stack where="{{main}}" level="1" type="file" filename="file:///a.php" lineno="3"/><stack where="foo" level="0" type="file" filename="file:///b.php" lineno="12"/></response>"#
        ));
        assert_eq!(
            r.kind,
            ResponseKind::StackGet(vec![
                StackFrame { depth: 0, label: "foo".to_string(), file: "/b.php".to_string(), line: 12 },
                StackFrame { depth: 1, label: "{main}".to_string(), file: "/a.php".to_string(), line: 3 },
            ])
        );
    }

    #[test]
    fn test_parse_eval_error() {
        let r = response(&format!(
            r#"<response {XMLNS} command="eval" transaction_id="8"><error code="206"><message><![CDATA[error evaluating code]]></message></error></response>"#
        ));
        assert_eq!(
            r.kind,
            ResponseKind::Eval(Err(EngineFault {
                code: 206,
                message: "error evaluating code".to_string(),
            }))
        );
    }

    #[test]
    fn test_error_is_captured_on_any_command() {
        let r = response(&format!(
            r#"<response {XMLNS} command="context_get" transaction_id="11" context="2"><error code="302"><message>invalid context</message></error></response>"#
        ));
        assert_eq!(
            r.error,
            Some(EngineFault {
                code: 302,
                message: "invalid context".to_string(),
            })
        );

        let ok = response(&format!(r#"<response {XMLNS} command="breakpoint_remove" transaction_id="12"/>"#));
        assert_eq!(ok.error, None);
        assert_eq!(ok.kind, ResponseKind::BreakpointRemove);
    }

    #[test]
    fn test_parse_breakpoint_set() {
        let r = response(&format!(
            r#"<response {XMLNS} command="breakpoint_set" transaction_id="3" id="180001"/>"#
        ));
        assert_eq!(r.transaction_id, Some(3));
        assert_eq!(
            r.kind,
            ResponseKind::BreakpointSet { id: Some("180001".to_string()) }
        );
    }

    #[test]
    fn test_unknown_command_is_other() {
        let r = response(&format!(r#"<response {XMLNS} command="feature_set" transaction_id="1" success="1"/>"#));
        assert_eq!(r.kind, ResponseKind::Other);
    }

    #[test]
    fn test_malformed_xml_fails() {
        assert!(matches!(EnginePacket::parse("<response"), Err(BridgeError::Xml(_))));
    }
}
