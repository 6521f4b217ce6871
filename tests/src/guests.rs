//! Guest modules in wasm text format.
//!
//! Every fixture imports the full host ABI from `env` and exports one page of
//! `memory`. Layout of that memory:
//!
//! | offset  | contents                                 |
//! |---------|------------------------------------------|
//! | 4096    | event written by `kite_get_event`        |
//! | 8192    | call responses and config read by guest  |
//! | 16384.. | static strings: manifest, requests, logs |

use serde_json::{Value, json};

/// Event type every fixture subscribes to unless told otherwise.
pub const MESSAGE_CREATE: &str = "DISCORD_MESSAGE_CREATE";

const EVENT_AT: u32 = 4096;
const BUFFER_AT: u32 = 8192;
const STRINGS_AT: u32 = 16384;

/// Level passed to `kite_log` for logged call responses and config.
const LOG_INFO: u32 = 1;

/// Builds a guest module instruction by instruction.
pub struct GuestBuilder {
    api_version: u32,
    api_encoding: u32,
    manifest: Option<Vec<u8>>,
    describe: Vec<String>,
    handle: Vec<String>,
    data: Vec<(u32, Vec<u8>)>,
    next: u32,
}

impl GuestBuilder {
    /// A guest subscribed to `events`.
    pub fn new(events: &[&str]) -> Self {
        Self::with_manifest(json!({ "events": events }))
    }

    pub fn with_manifest(manifest: Value) -> Self {
        Self {
            api_version: 0,
            api_encoding: 0,
            manifest: Some(manifest.to_string().into_bytes()),
            describe: Vec::new(),
            handle: Vec::new(),
            data: Vec::new(),
            next: STRINGS_AT,
        }
    }

    /// A guest whose `kite_describe` never sets a manifest.
    pub fn without_manifest() -> Self {
        Self {
            manifest: None,
            ..Self::new(&[])
        }
    }

    pub fn api_version(mut self, version: u32) -> Self {
        self.api_version = version;
        self
    }

    pub fn api_encoding(mut self, encoding: u32) -> Self {
        self.api_encoding = encoding;
        self
    }

    fn alloc(&mut self, bytes: &[u8]) -> (u32, u32) {
        let offset = self.next;
        let len = bytes.len() as u32;
        self.data.push((offset, bytes.to_vec()));
        self.next += len.div_ceil(8) * 8 + 8;
        (offset, len)
    }

    fn push(mut self, instructions: String) -> Self {
        self.handle.push(instructions);
        self
    }

    /// Copy the event into guest memory.
    pub fn read_event(self) -> Self {
        self.push(format!("(drop (call $get_event (i32.const {EVENT_AT})))"))
    }

    /// Issue `request`, then log the call response at info level.
    pub fn call(self, request: Value) -> Self {
        self.call_times(request, 1)
    }

    /// Issue `request` `times` times, logging every response.
    pub fn call_times(mut self, request: Value, times: u32) -> Self {
        let (offset, len) = self.alloc(request.to_string().as_bytes());
        self.push(format!(
            r#"(local.set $i (i32.const 0))
    (block $done
      (loop $again
        (br_if $done (i32.ge_u (local.get $i) (i32.const {times})))
        (local.set $n (call $call (i32.const {offset}) (i32.const {len})))
        (drop (call $get_call_response (i32.const {BUFFER_AT})))
        (drop (call $log (i32.const {LOG_INFO}) (i32.const {BUFFER_AT}) (local.get $n)))
        (local.set $i (i32.add (local.get $i) (i32.const 1)))
        (br $again)))"#
        ))
    }

    pub fn log(mut self, level: u32, message: &str) -> Self {
        let (offset, len) = self.alloc(message.as_bytes());
        self.push(format!(
            "(drop (call $log (i32.const {level}) (i32.const {offset}) (i32.const {len})))"
        ))
    }

    /// Fetch the deployment config and log it at info level.
    pub fn log_config(self) -> Self {
        self.push(format!(
            r#"(local.set $n (call $get_config_size))
    (drop (call $get_config (i32.const {BUFFER_AT})))
    (drop (call $log (i32.const {LOG_INFO}) (i32.const {BUFFER_AT}) (local.get $n)))"#
        ))
    }

    pub fn respond(mut self, response: Value) -> Self {
        let (offset, len) = self.alloc(response.to_string().as_bytes());
        self.push(format!(
            "(drop (call $set_event_response (i32.const {offset}) (i32.const {len})))"
        ))
    }

    pub fn respond_ok(self) -> Self {
        self.respond(json!({ "success": true }))
    }

    /// Grow memory by `pages`; on refusal respond with error code 12 and return.
    pub fn grow_memory(mut self, pages: u32) -> Self {
        let refusal = json!({
            "success": false,
            "error": { "code": 12, "message": "out of memory" }
        });
        let (offset, len) = self.alloc(refusal.to_string().as_bytes());
        self.push(format!(
            r#"(if (i32.eq (memory.grow (i32.const {pages})) (i32.const -1))
      (then
        (drop (call $set_event_response (i32.const {offset}) (i32.const {len})))
        (return)))"#
        ))
    }

    pub fn busy_loop(self) -> Self {
        self.push("(loop $spin (br $spin))".to_string())
    }

    pub fn trap(self) -> Self {
        self.push("unreachable".to_string())
    }

    /// Raw instructions appended to `kite_handle`.
    pub fn instructions(self, wat: &str) -> Self {
        self.push(wat.to_string())
    }

    /// Raw instructions appended to `kite_describe`, after the manifest is set.
    pub fn describe_instructions(mut self, wat: &str) -> Self {
        self.describe.push(wat.to_string());
        self
    }

    /// Static bytes at a fresh offset, returned as `(offset, len)`.
    pub fn string(&mut self, value: &str) -> (u32, u32) {
        self.alloc(value.as_bytes())
    }

    pub fn build(mut self) -> String {
        let mut describe = Vec::new();
        if let Some(manifest) = self.manifest.take() {
            let (offset, len) = self.alloc(&manifest);
            describe.push(format!(
                "(drop (call $set_manifest (i32.const {offset}) (i32.const {len})))"
            ));
        }
        describe.extend(self.describe);

        let data: String = self
            .data
            .iter()
            .map(|(offset, bytes)| format!("  (data (i32.const {}) \"{}\")\n", offset, escape(bytes)))
            .collect();

        format!(
            r#"(module
  (import "env" "kite_set_manifest" (func $set_manifest (param i32 i32) (result i32)))
  (import "env" "kite_get_config_size" (func $get_config_size (result i32)))
  (import "env" "kite_get_config" (func $get_config (param i32) (result i32)))
  (import "env" "kite_log" (func $log (param i32 i32 i32) (result i32)))
  (import "env" "kite_call" (func $call (param i32 i32) (result i32)))
  (import "env" "kite_get_event" (func $get_event (param i32) (result i32)))
  (import "env" "kite_set_event_response" (func $set_event_response (param i32 i32) (result i32)))
  (import "env" "kite_get_call_response" (func $get_call_response (param i32) (result i32)))
  (memory (export "memory") 1)
{data}
  (func (export "kite_get_api_version") (result i32)
    (i32.const {version}))
  (func (export "kite_get_api_encoding") (result i32)
    (i32.const {encoding}))
  (func (export "kite_describe")
    {describe})
  (func (export "kite_handle") (param $len i32) (local $n i32) (local $i i32)
    {handle})
)"#,
            version = self.api_version,
            encoding = self.api_encoding,
            describe = describe.join("\n    "),
            handle = self.handle.join("\n    "),
        )
    }
}

fn escape(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("\\{:02x}", b)).collect()
}

/// Increments `count` in the default namespace once per event.
pub fn counter() -> String {
    GuestBuilder::new(&[MESSAGE_CREATE])
        .read_event()
        .call(json!({
            "type": "KV_KEY_INCREASE",
            "data": { "key": "count", "increment": 1 }
        }))
        .respond_ok()
        .build()
}

/// Issues one call per event and logs its response.
pub fn caller(request: Value) -> String {
    GuestBuilder::new(&[MESSAGE_CREATE])
        .read_event()
        .call(request)
        .respond_ok()
        .build()
}

/// Spins until interrupted.
pub fn busy_loop() -> String {
    GuestBuilder::new(&[MESSAGE_CREATE]).busy_loop().build()
}

/// Sleeps through the host for `duration_ms`.
pub fn sleeper(duration_ms: u64) -> String {
    caller(json!({ "type": "SLEEP", "data": { "duration": duration_ms } }))
}

/// Reports a business error: code 7, "boom".
pub fn failing() -> String {
    GuestBuilder::new(&[MESSAGE_CREATE])
        .respond(json!({
            "success": false,
            "error": { "code": 7, "message": "boom" }
        }))
        .build()
}

pub fn trapping() -> String {
    GuestBuilder::new(&[MESSAGE_CREATE]).trap().build()
}

/// Tries to grow memory by `pages` per event.
pub fn memory_hog(pages: u32) -> String {
    GuestBuilder::new(&[MESSAGE_CREATE])
        .grow_memory(pages)
        .respond_ok()
        .build()
}

/// Hands the host a buffer outside its memory.
pub fn out_of_bounds() -> String {
    GuestBuilder::new(&[MESSAGE_CREATE])
        .instructions("(drop (call $set_event_response (i32.const 0xFFFFFF00) (i32.const 64)))")
        .build()
}

/// Handles events without setting a response.
pub fn silent() -> String {
    GuestBuilder::new(&[MESSAGE_CREATE]).read_event().build()
}

/// Logs its config once per event. `manifest` must subscribe to [`MESSAGE_CREATE`].
pub fn config_logger(manifest: Value) -> String {
    GuestBuilder::with_manifest(manifest)
        .log_config()
        .respond_ok()
        .build()
}

pub fn unsupported_version() -> String {
    GuestBuilder::new(&[MESSAGE_CREATE]).api_version(7).build()
}

pub fn unsupported_encoding() -> String {
    GuestBuilder::new(&[MESSAGE_CREATE]).api_encoding(3).build()
}

pub fn without_manifest() -> String {
    GuestBuilder::without_manifest().build()
}

/// Never returns from `kite_describe`.
pub fn slow_describe() -> String {
    GuestBuilder::new(&[MESSAGE_CREATE])
        .describe_instructions("(loop $spin (br $spin))")
        .build()
}

/// Traps unless every out-of-state host call is refused.
///
/// During describe, `kite_call` must return 0 and `kite_get_event` must fail;
/// during an event, `kite_set_manifest` must fail.
pub fn state_checker() -> String {
    let mut builder = GuestBuilder::new(&[MESSAGE_CREATE]);
    let (call_at, call_len) = builder.string(&json!({ "type": "SLEEP", "data": { "duration": 1 } }).to_string());
    let (manifest_at, manifest_len) = builder.string(&json!({ "events": [] }).to_string());

    builder
        .describe_instructions(&format!(
            r#"(if (i32.ne (call $call (i32.const {call_at}) (i32.const {call_len})) (i32.const 0))
      (then unreachable))
    (if (i32.ne (call $get_event (i32.const {EVENT_AT})) (i32.const 1))
      (then unreachable))"#
        ))
        .instructions(&format!(
            r#"(if (i32.ne (call $set_manifest (i32.const {manifest_at}) (i32.const {manifest_len})) (i32.const 1))
      (then unreachable))"#
        ))
        .respond_ok()
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strings_do_not_overlap() {
        let mut builder = GuestBuilder::new(&[MESSAGE_CREATE]);
        let (a, a_len) = builder.string("hello");
        let (b, _) = builder.string("world");
        assert_eq!(a, STRINGS_AT);
        assert!(b >= a + a_len);
    }

    #[test]
    fn test_escape_is_byte_exact() {
        assert_eq!(escape(b"{\"a\""), "\\7b\\22\\61\\22");
    }

    #[test]
    fn test_module_text_declares_abi() {
        let wat = counter();
        assert!(wat.contains(r#"(export "kite_handle")"#));
        assert!(wat.contains(r#"(import "env" "kite_call""#));
        assert!(wat.contains(r#"(memory (export "memory") 1)"#));
    }
}
