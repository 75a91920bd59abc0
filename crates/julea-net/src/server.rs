//! Server dispatch loop: accepts connections, reads messages, invokes the
//! matching local backend method, and streams replies with bulk payloads.
//!
//! Grounded on spec.md §4.5: one task per accepted connection reads
//! messages until EOF; dispatch by message type calls the local backend;
//! for KV/DB a batch is opened at message start and executed at message
//! end, applying the message's safety class to the batch's semantics. The
//! header-level namespace string (spec.md §6) is read once per message,
//! before the per-operation loop. Per-thread statistics
//! (`julea_core::stats::ThreadStatistics`) are accumulated locally here and
//! folded into the process aggregate once the connection closes, mirroring
//! spec.md §4.5's "folded into a guarded process-wide aggregate at session
//! end."

use std::sync::Arc;

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};

use julea_backend::{DbBackend, KvBackend, ObjectBackend, Selector};
use julea_core::{requires_reply, BackendError, Message, MessageError, MessageFlags, MessageType, Safety, Statistics, ThreadStatistics};

/// The set of backend instances a server process has loaded for one or
/// more backend kinds (spec.md §4.2's client/server component loading).
pub struct Backends {
    pub object: Option<Arc<dyn ObjectBackend>>,
    pub kv: Option<Arc<dyn KvBackend>>,
    pub db: Option<Arc<dyn DbBackend>>,
}

/// Accepts connections on `listener` forever, spawning one task per
/// connection. Returns only on a listener error.
pub async fn serve(listener: TcpListener, backends: Arc<Backends>, max_operation_size: u64, statistics: Arc<Statistics>) -> std::io::Result<()> {
    loop {
        let (socket, peer) = listener.accept().await?;
        let backends = backends.clone();
        let statistics = statistics.clone();

        tokio::spawn(async move {
            tracing::debug!(%peer, "accepted connection");
            if let Err(e) = handle_connection(socket, backends, max_operation_size, &statistics).await {
                tracing::debug!(%peer, error = %e, "connection closed");
            }
        });
    }
}

async fn handle_connection(mut socket: TcpStream, backends: Arc<Backends>, max_operation_size: u64, statistics: &Statistics) -> Result<(), MessageError> {
    let mut local = ThreadStatistics::default();

    loop {
        let message = match Message::read_from(&mut socket, max_operation_size).await {
            Ok(m) => m,
            Err(MessageError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        };

        let reply = dispatch(message, &mut socket, &backends, max_operation_size, &mut local).await?;

        if let Some(reply) = reply {
            reply.write_to(&mut socket).await?;
        }
    }

    statistics.merge(&local);
    Ok(())
}

async fn dispatch(
    mut message: Message,
    socket: &mut TcpStream,
    backends: &Backends,
    max_operation_size: u64,
    stats: &mut ThreadStatistics,
) -> Result<Option<Message>, MessageError> {
    let safety = safety_of(message.flags());

    match message.op_type() {
        MessageType::Ping => {
            let mut reply = Message::new_reply(&message);
            let kinds = advertised_kinds(backends);
            reply.append_4(kinds.len() as u32);
            for kind in kinds {
                reply.add_send(Bytes::from(kind.as_bytes().to_vec()));
            }
            return Ok(Some(reply));
        }
        MessageType::Statistics => {
            return Ok(Some(Message::new_reply(&message)));
        }
        _ => {}
    }

    let namespace = message.get_string()?;
    let mut reply = Message::new_reply(&message);

    for _ in 0..message.count().max(1) {
        match message.op_type() {
            MessageType::KvPut => dispatch_kv_put(&mut message, backends, &namespace, safety, stats)?,
            MessageType::KvDelete => dispatch_kv_delete(&mut message, backends, &namespace, safety)?,
            MessageType::KvGet => dispatch_kv_get(&mut message, &mut reply, backends, &namespace)?,
            MessageType::KvGetAll => dispatch_kv_list(backends, &namespace, None, &mut reply)?,
            MessageType::KvGetByPrefix => {
                let prefix = message.get_string()?;
                dispatch_kv_list(backends, &namespace, Some(&prefix), &mut reply)?;
            }
            MessageType::ObjectCreate => dispatch_object_create(&mut message, backends, &namespace, stats)?,
            MessageType::ObjectDelete => dispatch_object_delete(&mut message, backends, &namespace, stats)?,
            MessageType::ObjectRead => dispatch_object_read(&mut message, &mut reply, backends, &namespace, max_operation_size, stats)?,
            MessageType::ObjectWrite => dispatch_object_write(&mut message, &mut reply, socket, backends, &namespace, stats).await?,
            MessageType::ObjectStatus => dispatch_object_status(&mut message, &mut reply, backends, &namespace)?,
            MessageType::ObjectSync => dispatch_object_sync(&mut message, backends, &namespace, stats)?,
            MessageType::ObjectGetAll | MessageType::ObjectGetByPrefix => {
                dispatch_object_list(&mut message, backends, &namespace, &mut reply)?;
            }
            MessageType::DbSchemaCreate => dispatch_db_schema_create(&mut message, backends, safety)?,
            MessageType::DbSchemaGet => dispatch_db_schema_get(&mut message, &mut reply, backends)?,
            MessageType::DbSchemaDelete => dispatch_db_schema_delete(&mut message, backends, safety)?,
            MessageType::DbInsert => dispatch_db_insert(&mut message, backends, safety)?,
            MessageType::DbUpdate => dispatch_db_update(&mut message, backends, safety)?,
            MessageType::DbDelete => dispatch_db_delete(&mut message, backends, safety)?,
            MessageType::DbQuery => dispatch_db_query(&mut message, &mut reply, backends)?,
            MessageType::None | MessageType::Ping | MessageType::Statistics => {}
        }
    }

    Ok(if requires_reply(message.op_type(), safety) { Some(reply) } else { None })
}

fn safety_of(flags: MessageFlags) -> Safety {
    if flags.contains(MessageFlags::SAFETY_STORAGE) {
        Safety::Storage
    } else if flags.contains(MessageFlags::SAFETY_NETWORK) {
        Safety::Network
    } else {
        Safety::None
    }
}

fn advertised_kinds(backends: &Backends) -> Vec<&'static str> {
    let mut kinds = Vec::new();
    if backends.object.is_some() {
        kinds.push("object");
    }
    if backends.kv.is_some() {
        kinds.push("kv");
    }
    if backends.db.is_some() {
        kinds.push("db");
    }
    kinds
}

fn kv(backends: &Backends) -> Result<&Arc<dyn KvBackend>, MessageError> {
    backends.kv.as_ref().ok_or(MessageError::Truncated("no kv backend loaded"))
}

fn object(backends: &Backends) -> Result<&Arc<dyn ObjectBackend>, MessageError> {
    backends.object.as_ref().ok_or(MessageError::Truncated("no object backend loaded"))
}

fn db(backends: &Backends) -> Result<&Arc<dyn DbBackend>, MessageError> {
    backends.db.as_ref().ok_or(MessageError::Truncated("no db backend loaded"))
}

fn dispatch_kv_put(message: &mut Message, backends: &Backends, namespace: &str, safety: Safety, stats: &mut ThreadStatistics) -> Result<(), MessageError> {
    let key = message.get_string()?;
    let len = message.get_4()? as usize;
    let value = message.get_n(len)?.to_vec();

    let backend = kv(backends)?;
    let mut batch = backend.batch_start(namespace, safety);
    batch.put(&key, &value);
    backend.batch_execute(batch).map_err(backend_err)?;
    stats.add_bytes_written(value.len() as u64);
    Ok(())
}

fn dispatch_kv_delete(message: &mut Message, backends: &Backends, namespace: &str, safety: Safety) -> Result<(), MessageError> {
    let key = message.get_string()?;
    let backend = kv(backends)?;
    let mut batch = backend.batch_start(namespace, safety);
    batch.delete(&key);
    backend.batch_execute(batch).map_err(backend_err)
}

fn dispatch_kv_get(message: &mut Message, reply: &mut Message, backends: &Backends, namespace: &str) -> Result<(), MessageError> {
    let key = message.get_string()?;
    let value = kv(backends)?.get(namespace, &key).map_err(backend_err)?;

    match value {
        Some(v) => {
            reply.append_4(v.len() as u32);
            reply.append_n(&v);
        }
        None => reply.append_4(0),
    }
    Ok(())
}

fn dispatch_kv_list(backends: &Backends, namespace: &str, prefix: Option<&str>, reply: &mut Message) -> Result<(), MessageError> {
    let entries = match prefix {
        Some(p) => kv(backends)?.get_by_prefix(namespace, p).map_err(backend_err)?,
        None => kv(backends)?.get_all(namespace).map_err(backend_err)?,
    };

    reply.append_4(entries.len() as u32);
    for (key, value) in entries {
        reply.append_string(&key);
        reply.append_4(value.len() as u32);
        reply.append_n(&value);
    }
    Ok(())
}

fn dispatch_object_create(message: &mut Message, backends: &Backends, namespace: &str, stats: &mut ThreadStatistics) -> Result<(), MessageError> {
    let path = message.get_string()?;
    object(backends)?.create(namespace, &path).map_err(backend_err)?;
    stats.add_files_created(1);
    Ok(())
}

fn dispatch_object_delete(message: &mut Message, backends: &Backends, namespace: &str, stats: &mut ThreadStatistics) -> Result<(), MessageError> {
    let path = message.get_string()?;
    let handle = object(backends)?.open(namespace, &path).map_err(backend_err)?;
    object(backends)?.delete(&handle).map_err(backend_err)?;
    stats.add_files_deleted(1);
    Ok(())
}

fn dispatch_object_read(
    message: &mut Message,
    reply: &mut Message,
    backends: &Backends,
    namespace: &str,
    max_operation_size: u64,
    stats: &mut ThreadStatistics,
) -> Result<(), MessageError> {
    let path = message.get_string()?;
    let len = message.get_8()?;
    let off = message.get_8()?;

    let capped = len.min(max_operation_size);
    let mut scratch = vec![0u8; capped as usize];

    let handle = object(backends)?.open(namespace, &path).map_err(backend_err)?;
    let bytes_read = object(backends)?.read(&handle, &mut scratch, off).map_err(backend_err)?;

    reply.append_8(bytes_read);
    reply.add_send(Bytes::copy_from_slice(&scratch[..bytes_read as usize]));
    stats.add_bytes_read(bytes_read);
    Ok(())
}

async fn dispatch_object_write(
    message: &mut Message,
    reply: &mut Message,
    socket: &mut TcpStream,
    backends: &Backends,
    namespace: &str,
    stats: &mut ThreadStatistics,
) -> Result<(), MessageError> {
    let path = message.get_string()?;
    let len = message.get_8()?;
    let off = message.get_8()?;

    let payload = Message::read_send_attached(socket).await?;
    if payload.len() as u64 != len {
        return Err(MessageError::Truncated("object write payload length mismatch"));
    }

    let handle = object(backends)?.open(namespace, &path).or_else(|_| object(backends)?.create(namespace, &path)).map_err(backend_err)?;
    let bytes_written = object(backends)?.write(&handle, &payload, off).map_err(backend_err)?;
    stats.add_bytes_written(bytes_written);
    reply.append_8(bytes_written);
    Ok(())
}

fn dispatch_object_status(message: &mut Message, reply: &mut Message, backends: &Backends, namespace: &str) -> Result<(), MessageError> {
    let path = message.get_string()?;
    let handle = object(backends)?.open(namespace, &path).map_err(backend_err)?;
    let status = object(backends)?.status(&handle).map_err(backend_err)?;

    let mtime = status.modified.duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    reply.append_8(mtime);
    reply.append_8(status.size);
    Ok(())
}

fn dispatch_object_sync(message: &mut Message, backends: &Backends, namespace: &str, stats: &mut ThreadStatistics) -> Result<(), MessageError> {
    let path = message.get_string()?;
    let handle = object(backends)?.open(namespace, &path).map_err(backend_err)?;
    object(backends)?.sync(&handle).map_err(backend_err)?;
    stats.add_sync();
    Ok(())
}

fn dispatch_object_list(message: &mut Message, backends: &Backends, namespace: &str, reply: &mut Message) -> Result<(), MessageError> {
    let names = if matches!(message.op_type(), MessageType::ObjectGetByPrefix) {
        let prefix = message.get_string()?;
        object(backends)?.get_by_prefix(namespace, &prefix).map_err(backend_err)?
    } else {
        object(backends)?.get_all(namespace).map_err(backend_err)?
    };

    reply.append_4(names.len() as u32);
    for name in names {
        reply.append_string(&name);
    }
    Ok(())
}

fn dispatch_db_schema_create(message: &mut Message, backends: &Backends, safety: Safety) -> Result<(), MessageError> {
    let name = message.get_string()?;
    let schema = read_document(message)?;

    let backend = db(backends)?;
    let mut batch = backend.batch_start(safety);
    batch.schema_create(&name, schema);
    backend.batch_execute(batch).map_err(backend_err)
}

fn dispatch_db_schema_get(message: &mut Message, reply: &mut Message, backends: &Backends) -> Result<(), MessageError> {
    let name = message.get_string()?;
    let schema = db(backends)?.schema_get(&name).map_err(backend_err)?;
    write_document(reply, &schema);
    Ok(())
}

fn dispatch_db_schema_delete(message: &mut Message, backends: &Backends, safety: Safety) -> Result<(), MessageError> {
    let name = message.get_string()?;
    let backend = db(backends)?;
    let mut batch = backend.batch_start(safety);
    batch.schema_delete(&name);
    backend.batch_execute(batch).map_err(backend_err)
}

fn dispatch_db_insert(message: &mut Message, backends: &Backends, safety: Safety) -> Result<(), MessageError> {
    let name = message.get_string()?;
    let row = read_document(message)?;

    let backend = db(backends)?;
    let mut batch = backend.batch_start(safety);
    batch.insert(&name, row);
    backend.batch_execute(batch).map_err(backend_err)
}

fn dispatch_db_update(message: &mut Message, backends: &Backends, safety: Safety) -> Result<(), MessageError> {
    let name = message.get_string()?;
    let selector = read_selector(message)?;
    let row = read_document(message)?;

    let backend = db(backends)?;
    let mut batch = backend.batch_start(safety);
    batch.update(&name, selector, row);
    backend.batch_execute(batch).map_err(backend_err)
}

fn dispatch_db_delete(message: &mut Message, backends: &Backends, safety: Safety) -> Result<(), MessageError> {
    let name = message.get_string()?;
    let selector = read_selector(message)?;

    let backend = db(backends)?;
    let mut batch = backend.batch_start(safety);
    batch.delete(&name, selector);
    backend.batch_execute(batch).map_err(backend_err)
}

fn dispatch_db_query(message: &mut Message, reply: &mut Message, backends: &Backends) -> Result<(), MessageError> {
    let name = message.get_string()?;
    let selector = read_selector(message).ok();

    let mut iter = db(backends)?.query(&name, selector.as_ref()).map_err(backend_err)?;
    let mut rows = Vec::new();
    while let Ok(row) = iter.next_row() {
        rows.push(row);
    }

    reply.append_4(rows.len() as u32);
    for row in &rows {
        write_document(reply, row);
    }
    Ok(())
}

/// Documents travel on the wire as length-prefixed JSON, the Rust analog of
/// the original's BSON-encoded schema/row blobs (spec.md §4.2).
fn read_document(message: &mut Message) -> Result<julea_backend::Document, MessageError> {
    let len = message.get_4()? as usize;
    let bytes = message.get_n(len)?;
    serde_json::from_slice(bytes).map_err(|_| MessageError::Truncated("invalid document json"))
}

fn write_document(reply: &mut Message, doc: &julea_backend::Document) {
    let bytes = serde_json::to_vec(doc).expect("document serializes");
    reply.append_4(bytes.len() as u32);
    reply.append_n(&bytes);
}

/// Selectors travel the same way as documents: a length-prefixed JSON
/// encoding of the `{_mode, ...}` / `{_name,_operator,_value}` tree
/// described in spec.md §4.2.
fn read_selector(message: &mut Message) -> Result<Selector, MessageError> {
    let len = message.get_4()? as usize;
    let bytes = message.get_n(len)?;
    let value: serde_json::Value = serde_json::from_slice(bytes).map_err(|_| MessageError::Truncated("invalid selector json"))?;
    parse_selector(&value).ok_or(MessageError::Truncated("malformed selector"))
}

fn parse_selector(value: &serde_json::Value) -> Option<Selector> {
    let obj = value.as_object()?;

    if let Some(mode) = obj.get("_mode").and_then(|m| m.as_str()) {
        let mode = match mode {
            "AND" => julea_backend::SelectorMode::And,
            "OR" => julea_backend::SelectorMode::Or,
            _ => return None,
        };
        let mut children = Vec::new();
        let mut i = 0;
        while let Some(child) = obj.get(&i.to_string()) {
            children.push(parse_selector(child)?);
            i += 1;
        }
        return Some(Selector::Group { mode, children });
    }

    let name = obj.get("_name")?.as_str()?.to_string();
    let operator = match obj.get("_operator")?.as_str()? {
        "EQ" => julea_backend::Operator::Eq,
        "NE" => julea_backend::Operator::Ne,
        "LT" => julea_backend::Operator::Lt,
        "LE" => julea_backend::Operator::Le,
        "GT" => julea_backend::Operator::Gt,
        "GE" => julea_backend::Operator::Ge,
        _ => return None,
    };
    let value = obj.get("_value")?.clone();

    Some(Selector::Leaf { name, operator, value })
}

fn backend_err(e: BackendError) -> MessageError {
    MessageError::Backend(e)
}
