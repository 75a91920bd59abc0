//! Client-side message encoding: builds request messages the server's
//! dispatch loop (`julea_net::server`) decodes, and decodes the replies it
//! sends back. Mirrors `julea_net::server`'s `read_document`/`write_document`
//! and `parse_selector` byte-for-byte so the two sides agree on the wire
//! shape described in spec.md §4.2/§6.

use julea_backend::{Document, Operator, Selector, SelectorMode};
use julea_core::{Message, MessageError};

pub(crate) fn encode_document(message: &mut Message, doc: &Document) {
    let bytes = serde_json::to_vec(doc).expect("document serializes");
    message.append_4(bytes.len() as u32);
    message.append_n(&bytes);
}

pub(crate) fn decode_document(message: &mut Message) -> Result<Document, MessageError> {
    let len = message.get_4()? as usize;
    let bytes = message.get_n(len)?;
    serde_json::from_slice(bytes).map_err(|_| MessageError::Truncated("invalid document json"))
}

pub(crate) fn encode_selector(message: &mut Message, selector: &Selector) {
    let value = selector_to_json(selector);
    let bytes = serde_json::to_vec(&value).expect("selector serializes");
    message.append_4(bytes.len() as u32);
    message.append_n(&bytes);
}

fn selector_to_json(selector: &Selector) -> serde_json::Value {
    match selector {
        Selector::Leaf { name, operator, value } => {
            let op = match operator {
                Operator::Eq => "EQ",
                Operator::Ne => "NE",
                Operator::Lt => "LT",
                Operator::Le => "LE",
                Operator::Gt => "GT",
                Operator::Ge => "GE",
            };
            serde_json::json!({ "_name": name, "_operator": op, "_value": value })
        }
        Selector::Group { mode, children } => {
            let mode = match mode {
                SelectorMode::And => "AND",
                SelectorMode::Or => "OR",
            };
            let mut obj = serde_json::Map::new();
            obj.insert("_mode".to_string(), serde_json::json!(mode));
            for (i, child) in children.iter().enumerate() {
                obj.insert(i.to_string(), selector_to_json(child));
            }
            serde_json::Value::Object(obj)
        }
    }
}
