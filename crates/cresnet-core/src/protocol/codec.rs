//! XML codec for Cresnet protocol messages.
//!
//! Outbound messages are rendered as fixed envelopes with the variable parts
//! escaped.  Inbound frames (one complete `<cresnet>` element each, as cut by
//! [`crate::protocol::FrameDecoder`]) are parsed with `quick-xml` into a small
//! element tree and classified into a [`CresnetMessage`].
//!
//! Classification walks the tree in document order and dispatches on the
//! first protocol-significant element it meets (`status`, `connectResponse`,
//! `code`, `heartbeatResponse`, `disconnectRequest` or `data`), so the result
//! never depends on the order in which checks happen to be written.

use std::borrow::Cow;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use thiserror::Error;

use crate::domain::signal::{SignalClass, SignalValue};
use crate::protocol::messages::{
    Capabilities, CresnetMessage, CONNECT_CODE_ACCEPTED, DEVICE_PRODUCT, DEVICE_VERSION,
    MAX_EXTENDED_LENGTH_PACKET_MASK, ROOT_ELEMENT, STATUS_READY_FOR_CONNECT,
};

/// Errors that can occur while framing or decoding inbound messages.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The frame is not well-formed XML.
    #[error("malformed XML: {0}")]
    Malformed(String),

    /// The receive buffer grew past its limit without completing an element.
    #[error("frame exceeds {limit} bytes without a complete element")]
    FrameTooLarge { limit: usize },

    /// The frame bytes are not valid UTF-8.
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,

    /// A required attribute is missing from an element.
    #[error("<{element}> is missing the {attribute:?} attribute")]
    MissingAttribute {
        element: String,
        attribute: &'static str,
    },

    /// A numeric field could not be parsed.
    #[error("invalid {field}: {raw:?}")]
    InvalidNumber { field: &'static str, raw: String },
}

// ── Outbound encoding ─────────────────────────────────────────────────────────

/// Renders a data write for signal `id`.
///
/// The element (`bool`, `i32`, `string`) is chosen from the value's class and
/// the value is written as its escaped wire text.
///
/// # Examples
///
/// ```rust
/// use cresnet_core::{encode_data, SignalValue};
///
/// let xml = encode_data(5, &SignalValue::Digital(true), true);
/// assert!(xml.contains(r#"<bool id="5" value="true" repeating="true"/>"#));
/// ```
pub fn encode_data(id: u32, value: &SignalValue, repeat: bool) -> String {
    let wire = value.wire_text();
    format!(
        "<cresnet><data eom=\"false\" handle=\"3\" slot=\"0\" som=\"false\"><{element} id=\"{id}\" value=\"{value}\" repeating=\"{repeat}\"/></data></cresnet>",
        element = value.class().wire_element(),
        value = escape(wire.as_str()),
    )
}

/// Renders the connect request carrying `passcode` and the capability flags.
pub fn encode_connect_request(passcode: &str, caps: &Capabilities) -> String {
    format!(
        "<cresnet><control><comm><connectRequest><passcode>{passcode}</passcode>\
         <mode isAuthenticationRequired=\"{auth}\" isDigitalRepeatSupported=\"{repeat}\" \
         isHeartbeatSupported=\"{heartbeat}\" isProgramReadySupported=\"{ready}\" \
         isUnicodeSupported=\"{unicode}\"></mode>\
         <device><product>{DEVICE_PRODUCT}</product><version>{DEVICE_VERSION}</version>\
         <maxExtendedLengthPacketMask>{MAX_EXTENDED_LENGTH_PACKET_MASK}</maxExtendedLengthPacketMask></device>\
         </connectRequest></comm></control></cresnet>",
        passcode = escape(passcode),
        auth = caps.authentication_required,
        repeat = caps.digital_repeat,
        heartbeat = caps.heartbeat,
        ready = caps.program_ready,
        unicode = caps.unicode,
    )
}

// ── Inbound decoding ──────────────────────────────────────────────────────────

/// Decodes one complete top-level element into a [`CresnetMessage`].
///
/// # Errors
///
/// Returns [`ProtocolError`] if the XML is malformed or a recognised message
/// carries an unparseable id or code.  Content that is well-formed but not
/// understood decodes to [`CresnetMessage::Unrecognized`] instead.
///
/// # Examples
///
/// ```rust
/// use cresnet_core::{decode_frame, CresnetMessage, SignalClass};
///
/// let msg = decode_frame(r#"<cresnet><data><i32 id="3">75</i32></data></cresnet>"#).unwrap();
/// assert_eq!(
///     msg,
///     CresnetMessage::DataUpdate { class: SignalClass::Analog, id: 3, raw_value: "75".into() }
/// );
/// ```
pub fn decode_frame(frame: &str) -> Result<CresnetMessage, ProtocolError> {
    let root = parse_tree(frame)?;
    if root.name != ROOT_ELEMENT {
        return Ok(CresnetMessage::Unrecognized(frame.to_string()));
    }

    let Some(hit) = root.first_significant() else {
        return Ok(CresnetMessage::Unrecognized(frame.to_string()));
    };

    let msg = match hit.name.as_str() {
        "status" => CresnetMessage::ReadyForConnect,
        "connectResponse" => {
            let code = hit.find("code").ok_or_else(|| {
                ProtocolError::Malformed("connectResponse without a code".to_string())
            })?;
            connect_result(parse_code(code)?)
        }
        "code" => connect_result(parse_code(hit)?),
        "heartbeatResponse" => CresnetMessage::HeartbeatResponse,
        "disconnectRequest" => CresnetMessage::DisconnectNotice,
        "data" => decode_data(hit, frame)?,
        _ => CresnetMessage::Unrecognized(frame.to_string()),
    };
    Ok(msg)
}

/// Elements that decide which message a frame is.
const SIGNIFICANT: &[&str] = &[
    "status",
    "connectResponse",
    "code",
    "heartbeatResponse",
    "disconnectRequest",
    "data",
];

fn connect_result(code: i32) -> CresnetMessage {
    if code == CONNECT_CODE_ACCEPTED {
        CresnetMessage::ConnectAccepted(code)
    } else {
        CresnetMessage::ConnectRejected(code)
    }
}

fn parse_code(el: &Element) -> Result<i32, ProtocolError> {
    let raw = el.text.trim();
    raw.parse::<i32>().map_err(|_| ProtocolError::InvalidNumber {
        field: "connect code",
        raw: raw.to_string(),
    })
}

fn decode_data(data: &Element, frame: &str) -> Result<CresnetMessage, ProtocolError> {
    let Some((class, signal)) = data.find_signal() else {
        return Ok(CresnetMessage::Unrecognized(frame.to_string()));
    };

    let raw_id = signal.attr("id").ok_or_else(|| ProtocolError::MissingAttribute {
        element: signal.name.clone(),
        attribute: "id",
    })?;
    let id = raw_id.trim().parse::<u32>().map_err(|_| ProtocolError::InvalidNumber {
        field: "signal id",
        raw: raw_id.to_string(),
    })?;

    // Digital values travel in the `value` attribute; analog and serial
    // values usually travel as element text.
    let raw_value = match class {
        SignalClass::Digital => signal
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| signal.text.clone()),
        SignalClass::Analog | SignalClass::Serial => {
            if signal.text.is_empty() {
                signal.attr("value").unwrap_or_default().to_string()
            } else {
                signal.text.clone()
            }
        }
    };

    Ok(CresnetMessage::DataUpdate {
        class,
        id,
        raw_value,
    })
}

// ── Element tree ──────────────────────────────────────────────────────────────

/// Minimal owned XML element: just enough structure to classify a frame.
#[derive(Debug, Default)]
struct Element {
    name: String,
    attributes: Vec<(String, String)>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// First descendant named `name`, in document order.
    fn find(&self, name: &str) -> Option<&Element> {
        self.find_by(&|el| el.name == name)
    }

    /// A `status` other than ready-for-connect is passed over.
    fn first_significant(&self) -> Option<&Element> {
        self.find_by(&|el| {
            SIGNIFICANT.contains(&el.name.as_str())
                && (el.name != "status" || el.text.trim() == STATUS_READY_FOR_CONNECT)
        })
    }

    /// First descendant that is a typed signal element.
    fn find_signal(&self) -> Option<(SignalClass, &Element)> {
        self.find_by(&|el| SignalClass::from_wire_element(&el.name).is_some())
            .and_then(|el| SignalClass::from_wire_element(&el.name).map(|class| (class, el)))
    }

    fn find_by(&self, pred: &dyn Fn(&Element) -> bool) -> Option<&Element> {
        for child in &self.children {
            if pred(child) {
                return Some(child);
            }
            if let Some(found) = child.find_by(pred) {
                return Some(found);
            }
        }
        None
    }
}

fn parse_tree(frame: &str) -> Result<Element, ProtocolError> {
    let mut reader = Reader::from_str(frame);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        match reader.read_event().map_err(malformed)? {
            Event::Start(start) => stack.push(element_from(&start)?),
            Event::Empty(start) => {
                let el = element_from(&start)?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| ProtocolError::Malformed("unexpected closing tag".to_string()))?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape().map_err(malformed)?);
                }
            }
            Event::CData(cdata) => {
                if let Some(top) = stack.last_mut() {
                    let bytes = cdata.into_inner();
                    let text = std::str::from_utf8(&bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
                    top.text.push_str(text);
                }
            }
            Event::Eof => break,
            // Declarations, comments, processing instructions, doctype.
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ProtocolError::Malformed("unclosed element".to_string()));
    }
    root.ok_or_else(|| ProtocolError::Malformed("no root element".to_string()))
}

fn attach(stack: &mut [Element], root: &mut Option<Element>, el: Element) -> Result<(), ProtocolError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(el),
        None if root.is_none() => *root = Some(el),
        None => return Err(ProtocolError::Malformed("more than one root element".to_string())),
    }
    Ok(())
}

fn element_from(start: &BytesStart<'_>) -> Result<Element, ProtocolError> {
    let name = utf8(start.name().as_ref())?.into_owned();
    let mut attributes = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(malformed)?;
        let key = utf8(attr.key.as_ref())?.into_owned();
        let value = attr.unescape_value().map_err(malformed)?.into_owned();
        attributes.push((key, value));
    }
    Ok(Element {
        name,
        attributes,
        ..Element::default()
    })
}

fn utf8(bytes: &[u8]) -> Result<Cow<'_, str>, ProtocolError> {
    std::str::from_utf8(bytes)
        .map(Cow::Borrowed)
        .map_err(|_| ProtocolError::InvalidUtf8)
}

fn malformed(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Malformed(e.to_string())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{HEARTBEAT_REQUEST, UPDATE_REQUEST};

    fn data_update(class: SignalClass, id: u32, raw: &str) -> CresnetMessage {
        CresnetMessage::DataUpdate {
            class,
            id,
            raw_value: raw.to_string(),
        }
    }

    // ── Encoding ──────────────────────────────────────────────────────────────

    #[test]
    fn test_encode_digital_write_matches_processor_envelope() {
        let xml = encode_data(12, &SignalValue::Digital(false), true);
        assert_eq!(
            xml,
            "<cresnet><data eom=\"false\" handle=\"3\" slot=\"0\" som=\"false\"><bool id=\"12\" value=\"false\" repeating=\"true\"/></data></cresnet>"
        );
    }

    #[test]
    fn test_encode_analog_write_uses_i32_element_and_decimal_text() {
        let xml = encode_data(7, &SignalValue::Analog(-32768), false);
        assert!(xml.contains(r#"<i32 id="7" value="-32768" repeating="false"/>"#));
    }

    #[test]
    fn test_encode_serial_write_escapes_markup() {
        // Arrange
        let value = SignalValue::Serial(r#"Tom & "Jerry" <3"#.to_string());

        // Act
        let xml = encode_data(1, &value, true);

        // Assert – the raw text must not break the attribute or the element
        assert!(xml.contains("<string id=\"1\" value=\"Tom &amp; &quot;Jerry&quot; &lt;3\""));
    }

    #[test]
    fn test_encoded_serial_write_decodes_back_to_original_text() {
        let original = "a<b>&c'd\"e";
        let xml = encode_data(40, &SignalValue::Serial(original.to_string()), true);

        let decoded = decode_frame(&xml).unwrap();

        assert_eq!(decoded, data_update(SignalClass::Serial, 40, original));
    }

    #[test]
    fn test_encode_connect_request_carries_passcode_and_default_capabilities() {
        let xml = encode_connect_request("1234", &Capabilities::default());

        assert!(xml.starts_with("<cresnet><control><comm><connectRequest><passcode>1234</passcode>"));
        assert!(xml.contains(r#"isAuthenticationRequired="false""#));
        assert!(xml.contains(r#"isDigitalRepeatSupported="true""#));
        assert!(xml.contains(r#"isHeartbeatSupported="true""#));
        assert!(xml.contains(r#"isProgramReadySupported="true""#));
        assert!(xml.contains(r#"isUnicodeSupported="true""#));
        assert!(xml.contains("<maxExtendedLengthPacketMask>3</maxExtendedLengthPacketMask>"));
        assert!(xml.ends_with("</connectRequest></comm></control></cresnet>"));
    }

    #[test]
    fn test_encode_connect_request_is_well_formed() {
        let xml = encode_connect_request("p&ss", &Capabilities::default());
        // A well-formed request parses; it just isn't a message the client acts on.
        assert!(matches!(decode_frame(&xml), Ok(CresnetMessage::Unrecognized(_))));
    }

    #[test]
    fn test_fixed_requests_are_well_formed() {
        assert!(parse_tree(UPDATE_REQUEST).is_ok());
        assert!(parse_tree(HEARTBEAT_REQUEST).is_ok());
    }

    // ── Decoding: control messages ────────────────────────────────────────────

    #[test]
    fn test_decode_status_02_is_ready_for_connect() {
        let msg = decode_frame("<cresnet><control><comm><status>02</status></comm></control></cresnet>");
        assert_eq!(msg, Ok(CresnetMessage::ReadyForConnect));
    }

    #[test]
    fn test_decode_other_status_is_unrecognized() {
        let msg = decode_frame("<cresnet><control><comm><status>01</status></comm></control></cresnet>");
        assert!(matches!(msg, Ok(CresnetMessage::Unrecognized(_))));
    }

    #[test]
    fn test_decode_other_status_falls_through_to_later_elements() {
        // Arrange
        let heartbeat = "<cresnet><control><comm><status>01</status><heartbeatResponse/></comm></control></cresnet>";
        let data = r#"<cresnet><control><status>05</status></control><data><i32 id="4">9</i32></data></cresnet>"#;

        // Act / Assert
        assert_eq!(decode_frame(heartbeat), Ok(CresnetMessage::HeartbeatResponse));
        assert_eq!(
            decode_frame(data),
            Ok(CresnetMessage::DataUpdate {
                class: SignalClass::Analog,
                id: 4,
                raw_value: "9".to_string(),
            })
        );
    }

    #[test]
    fn test_decode_connect_response_code_zero_is_accepted() {
        let msg = decode_frame(
            "<cresnet><control><comm><connectResponse><code>0</code></connectResponse></comm></control></cresnet>",
        );
        assert_eq!(msg, Ok(CresnetMessage::ConnectAccepted(0)));
    }

    #[test]
    fn test_decode_connect_response_nonzero_code_is_rejected() {
        let msg = decode_frame(
            "<cresnet><control><comm><connectResponse><code>-1</code></connectResponse></comm></control></cresnet>",
        );
        assert_eq!(msg, Ok(CresnetMessage::ConnectRejected(-1)));
    }

    #[test]
    fn test_decode_non_numeric_code_is_protocol_error() {
        let msg = decode_frame(
            "<cresnet><control><comm><connectResponse><code>ok</code></connectResponse></comm></control></cresnet>",
        );
        assert!(matches!(msg, Err(ProtocolError::InvalidNumber { field: "connect code", .. })));
    }

    #[test]
    fn test_decode_heartbeat_response() {
        let msg = decode_frame(
            "<cresnet><control><comm><heartbeatResponse></heartbeatResponse></comm></control></cresnet>",
        );
        assert_eq!(msg, Ok(CresnetMessage::HeartbeatResponse));
    }

    #[test]
    fn test_decode_disconnect_request() {
        let msg = decode_frame(
            "<cresnet><control><comm><disconnectRequest><reason>5</reason></disconnectRequest></comm></control></cresnet>",
        );
        assert_eq!(msg, Ok(CresnetMessage::DisconnectNotice));
    }

    #[test]
    fn test_decode_accepts_xml_declaration() {
        let msg = decode_frame(
            "<?xml version=\"1.0\"?><cresnet><control><comm><status>02</status></comm></control></cresnet>",
        );
        assert_eq!(msg, Ok(CresnetMessage::ReadyForConnect));
    }

    // ── Decoding: data ────────────────────────────────────────────────────────

    #[test]
    fn test_decode_bool_reads_value_attribute() {
        let msg = decode_frame(r#"<cresnet><data eom="false" som="false"><bool id="5" value="true"/></data></cresnet>"#);
        assert_eq!(msg, Ok(data_update(SignalClass::Digital, 5, "true")));
    }

    #[test]
    fn test_decode_i32_reads_text_payload() {
        let msg = decode_frame(r#"<cresnet><data><i32 id="20">65535</i32></data></cresnet>"#);
        assert_eq!(msg, Ok(data_update(SignalClass::Analog, 20, "65535")));
    }

    #[test]
    fn test_decode_i32_falls_back_to_value_attribute() {
        let msg = decode_frame(r#"<cresnet><data><i32 id="20" value="-4"/></data></cresnet>"#);
        assert_eq!(msg, Ok(data_update(SignalClass::Analog, 20, "-4")));
    }

    #[test]
    fn test_decode_string_keeps_whitespace_and_unescapes_entities() {
        let msg = decode_frame(r#"<cresnet><data><string id="3"> Now &amp; Then </string></data></cresnet>"#);
        assert_eq!(msg, Ok(data_update(SignalClass::Serial, 3, " Now & Then ")));
    }

    #[test]
    fn test_decode_empty_string_element_is_empty_value() {
        let msg = decode_frame(r#"<cresnet><data><string id="3"></string></data></cresnet>"#);
        assert_eq!(msg, Ok(data_update(SignalClass::Serial, 3, "")));
    }

    #[test]
    fn test_decode_data_without_signal_child_is_unrecognized() {
        let msg = decode_frame(
            r#"<cresnet><data eom="false" som="false"><updateCommand><endOfUpdate/></updateCommand></data></cresnet>"#,
        );
        assert!(matches!(msg, Ok(CresnetMessage::Unrecognized(_))));
    }

    #[test]
    fn test_decode_signal_without_id_is_protocol_error() {
        let msg = decode_frame(r#"<cresnet><data><bool value="true"/></data></cresnet>"#);
        assert!(matches!(msg, Err(ProtocolError::MissingAttribute { attribute: "id", .. })));
    }

    #[test]
    fn test_decode_negative_id_is_protocol_error() {
        let msg = decode_frame(r#"<cresnet><data><bool id="-1" value="true"/></data></cresnet>"#);
        assert!(matches!(msg, Err(ProtocolError::InvalidNumber { field: "signal id", .. })));
    }

    // ── Decoding: error conditions ────────────────────────────────────────────

    #[test]
    fn test_decode_mismatched_end_tag_is_malformed() {
        let msg = decode_frame("<cresnet><data></cresnet></data>");
        assert!(matches!(msg, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_unclosed_element_is_malformed() {
        let msg = decode_frame("<cresnet><data>");
        assert!(matches!(msg, Err(ProtocolError::Malformed(_))));
    }

    #[test]
    fn test_decode_foreign_root_is_unrecognized() {
        let msg = decode_frame("<other><status>02</status></other>");
        assert!(matches!(msg, Ok(CresnetMessage::Unrecognized(_))));
    }
}
