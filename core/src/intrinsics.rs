/*
 * Copyright (c) 2026 Mohamad Al-Zawahreh (dba Sovereign Systems).
 *
 * This file is part of the Ark Enclave Runtime.
 *
 * LICENSE: DUAL-LICENSED (AGPLv3 or COMMERCIAL).
 */

use crate::runtime::{NativeFn, RuntimeError, Value};
use crate::sandbox::{self, AccessMode, Capability, ExecError, Policy};
use std::collections::HashMap;
use std::fs;
use std::io::{Read, Write};
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use chrono::Utc;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};

/// Fixed table of native functions, keyed by flat (possibly dotted) name.
/// Built once per process and handed to each engine by reference; test
/// harnesses build alternate tables with `register` instead of patching a
/// global.
pub struct IntrinsicRegistry {
    table: HashMap<String, NativeFn>,
    policy: Rc<Policy>,
}

impl IntrinsicRegistry {
    pub fn with_defaults(policy: Rc<Policy>) -> Self {
        let mut registry = Self::empty(policy);
        registry.install_defaults();
        registry
    }

    /// Empty table, for harnesses that want full control over dispatch.
    pub fn empty(policy: Rc<Policy>) -> Self {
        IntrinsicRegistry {
            table: HashMap::new(),
            policy,
        }
    }

    /// Registration is only meaningful before execution starts; the table is
    /// read-only once an engine holds it.
    pub fn register(&mut self, name: &str, f: NativeFn) {
        self.table.insert(name.to_string(), f);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.table.contains_key(name)
    }

    pub fn dispatch(&self, name: &str, args: Vec<Value>) -> Result<Value, RuntimeError> {
        match self.table.get(name) {
            Some(f) => f(&self.policy, args),
            None => Err(RuntimeError::FunctionNotFound(name.to_string())),
        }
    }

    fn install_defaults(&mut self) {
        self.register("print", intrinsic_print);
        self.register("len", intrinsic_len);
        self.register("sys.log", intrinsic_log);

        self.register("math.div", intrinsic_div);
        self.register("math.mod", intrinsic_mod);
        self.register("math.pow", intrinsic_pow);
        self.register("math.sqrt", intrinsic_sqrt);

        self.register("sys.list.get", intrinsic_list_get);
        self.register("sys.list.set", intrinsic_list_set);
        self.register("sys.list.append", intrinsic_list_append);
        self.register("sys.list.pop", intrinsic_list_pop);

        self.register("sys.map.new", intrinsic_map_new);
        self.register("sys.map.get", intrinsic_map_get);
        self.register("sys.map.set", intrinsic_map_set);
        self.register("sys.map.has", intrinsic_map_has);
        self.register("sys.map.keys", intrinsic_map_keys);

        self.register("sys.set.new", intrinsic_set_new);
        self.register("sys.set.add", intrinsic_set_add);
        self.register("sys.set.has", intrinsic_set_has);

        self.register("sys.json.parse", intrinsic_json_parse);
        self.register("sys.json.stringify", intrinsic_json_stringify);

        self.register("sys.time.now", intrinsic_time_now);
        self.register("sys.time.sleep", intrinsic_time_sleep);

        self.register("sys.fs.read", intrinsic_fs_read);
        self.register("sys.fs.write", intrinsic_fs_write);
        self.register("sys.exec", intrinsic_exec);
        self.register("sys.net.http.request", intrinsic_http_request);

        self.register("sys.crypto.hash", intrinsic_crypto_hash);
        self.register("sys.crypto.sha512", intrinsic_crypto_sha512);
        self.register("sys.crypto.hmac_sha512", intrinsic_crypto_hmac_sha512);
        self.register("sys.crypto.pbkdf2", intrinsic_crypto_pbkdf2);
        self.register("sys.crypto.aes_gcm_encrypt", intrinsic_crypto_aes_gcm_encrypt);
        self.register("sys.crypto.aes_gcm_decrypt", intrinsic_crypto_aes_gcm_decrypt);
        self.register("sys.crypto.verify", intrinsic_crypto_verify);
        self.register("sys.crypto.random_bytes", intrinsic_crypto_random_bytes);
    }
}

fn expect_arity(name: &str, args: &[Value], n: usize) -> Result<(), RuntimeError> {
    if args.len() != n {
        return Err(RuntimeError::Arity(name.to_string(), n, args.len()));
    }
    Ok(())
}

fn expect_string(value: &Value) -> Result<&str, RuntimeError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(RuntimeError::TypeMismatch(
            "String".to_string(),
            other.clone(),
        )),
    }
}

fn expect_integer(value: &Value) -> Result<i64, RuntimeError> {
    match value {
        Value::Integer(i) => Ok(*i),
        other => Err(RuntimeError::TypeMismatch(
            "Integer".to_string(),
            other.clone(),
        )),
    }
}

fn expect_list(value: &Value) -> Result<&[Value], RuntimeError> {
    match value {
        Value::List(items) => Ok(items),
        other => Err(RuntimeError::TypeMismatch(
            "List".to_string(),
            other.clone(),
        )),
    }
}

fn expect_namespace(value: &Value) -> Result<&HashMap<String, Value>, RuntimeError> {
    match value {
        Value::Namespace(map) => Ok(map),
        other => Err(RuntimeError::TypeMismatch(
            "Namespace".to_string(),
            other.clone(),
        )),
    }
}

fn decode_hex(value: &Value, what: &str) -> Result<Vec<u8>, RuntimeError> {
    let s = expect_string(value)?;
    hex::decode(s)
        .map_err(|_| RuntimeError::TypeMismatch(format!("hex-encoded {}", what), value.clone()))
}

// ── Core ──

pub fn intrinsic_print(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    let line = args
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    println!("{}", line);
    Ok(Value::Unit)
}

pub fn intrinsic_log(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.log", &args, 1)?;
    eprintln!("[Ark:Log] {}", args[0]);
    Ok(Value::Unit)
}

pub fn intrinsic_len(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("len", &args, 1)?;
    let n = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Set(items) => items.len(),
        Value::Namespace(map) => map.len(),
        other => {
            return Err(RuntimeError::TypeMismatch(
                "String, List, Set, or Namespace".to_string(),
                other.clone(),
            ));
        }
    };
    Ok(Value::Integer(n as i64))
}

// ── Math ──

pub fn intrinsic_div(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("math.div", &args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Integer(_), Value::Integer(0)) => Err(RuntimeError::DivisionByZero),
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a / b)),
        (Value::Float(_), Value::Float(b)) if *b == 0.0 => Err(RuntimeError::DivisionByZero),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a / b)),
        (Value::Integer(_), Value::Float(b)) if *b == 0.0 => Err(RuntimeError::DivisionByZero),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float(*a as f64 / b)),
        (Value::Float(_), Value::Integer(0)) => Err(RuntimeError::DivisionByZero),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a / *b as f64)),
        (other, _) => Err(RuntimeError::TypeMismatch(
            "numeric operands".to_string(),
            other.clone(),
        )),
    }
}

pub fn intrinsic_mod(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("math.mod", &args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Integer(_), Value::Integer(0)) => Err(RuntimeError::DivisionByZero),
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(a % b)),
        (other, _) => Err(RuntimeError::TypeMismatch(
            "Integer operands".to_string(),
            other.clone(),
        )),
    }
}

pub fn intrinsic_pow(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("math.pow", &args, 2)?;
    match (&args[0], &args[1]) {
        (Value::Integer(a), Value::Integer(b)) if *b >= 0 => {
            let exp = u32::try_from(*b)
                .map_err(|_| RuntimeError::Failed("exponent out of range".to_string()))?;
            a.checked_pow(exp)
                .map(Value::Integer)
                .ok_or_else(|| RuntimeError::Failed("integer overflow in math.pow".to_string()))
        }
        (Value::Integer(a), Value::Integer(b)) => Ok(Value::Float((*a as f64).powf(*b as f64))),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a.powf(*b))),
        (Value::Integer(a), Value::Float(b)) => Ok(Value::Float((*a as f64).powf(*b))),
        (Value::Float(a), Value::Integer(b)) => Ok(Value::Float(a.powf(*b as f64))),
        (other, _) => Err(RuntimeError::TypeMismatch(
            "numeric operands".to_string(),
            other.clone(),
        )),
    }
}

pub fn intrinsic_sqrt(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("math.sqrt", &args, 1)?;
    match &args[0] {
        Value::Integer(a) => Ok(Value::Float((*a as f64).sqrt())),
        Value::Float(a) => Ok(Value::Float(a.sqrt())),
        other => Err(RuntimeError::TypeMismatch(
            "numeric operand".to_string(),
            other.clone(),
        )),
    }
}

// ── Lists ──

pub fn intrinsic_list_get(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.list.get", &args, 2)?;
    let items = expect_list(&args[0])?;
    let idx = expect_integer(&args[1])?;
    usize::try_from(idx)
        .ok()
        .and_then(|i| items.get(i))
        .cloned()
        .ok_or_else(|| RuntimeError::Failed(format!("list index {} out of range", idx)))
}

pub fn intrinsic_list_set(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.list.set", &args, 3)?;
    let items = expect_list(&args[0])?;
    let idx = expect_integer(&args[1])?;
    let pos = usize::try_from(idx)
        .ok()
        .filter(|i| *i < items.len())
        .ok_or_else(|| RuntimeError::Failed(format!("list index {} out of range", idx)))?;
    let mut updated = items.to_vec();
    updated[pos] = args[2].clone();
    Ok(Value::List(updated))
}

pub fn intrinsic_list_append(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.list.append", &args, 2)?;
    let items = expect_list(&args[0])?;
    let mut updated = items.to_vec();
    updated.push(args[1].clone());
    Ok(Value::List(updated))
}

/// Returns `[popped, rest]` so the caller gets both the element and the
/// shrunken list in one dispatch.
pub fn intrinsic_list_pop(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.list.pop", &args, 2)?;
    let items = expect_list(&args[0])?;
    let idx = expect_integer(&args[1])?;
    let pos = usize::try_from(idx)
        .ok()
        .filter(|i| *i < items.len())
        .ok_or_else(|| RuntimeError::Failed(format!("list index {} out of range", idx)))?;
    let mut rest = items.to_vec();
    let popped = rest.remove(pos);
    Ok(Value::List(vec![popped, Value::List(rest)]))
}

// ── Namespaces (mappings) ──

pub fn intrinsic_map_new(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.map.new", &args, 0)?;
    Ok(Value::Namespace(HashMap::new()))
}

pub fn intrinsic_map_get(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.map.get", &args, 2)?;
    let map = expect_namespace(&args[0])?;
    let key = expect_string(&args[1])?;
    map.get(key)
        .cloned()
        .ok_or_else(|| RuntimeError::Failed(format!("key '{}' not found", key)))
}

pub fn intrinsic_map_set(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.map.set", &args, 3)?;
    let map = expect_namespace(&args[0])?;
    let key = expect_string(&args[1])?;
    let mut updated = map.clone();
    updated.insert(key.to_string(), args[2].clone());
    Ok(Value::Namespace(updated))
}

pub fn intrinsic_map_has(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.map.has", &args, 2)?;
    let map = expect_namespace(&args[0])?;
    let key = expect_string(&args[1])?;
    Ok(Value::Boolean(map.contains_key(key)))
}

/// Keys come back sorted: dispatch must be deterministic across runs and
/// engines.
pub fn intrinsic_map_keys(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.map.keys", &args, 1)?;
    let map = expect_namespace(&args[0])?;
    let mut keys: Vec<String> = map.keys().cloned().collect();
    keys.sort();
    Ok(Value::List(keys.into_iter().map(Value::String).collect()))
}

// ── Sets ──

pub fn intrinsic_set_new(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.set.new", &args, 0)?;
    Ok(Value::Set(Vec::new()))
}

pub fn intrinsic_set_add(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.set.add", &args, 2)?;
    let items = match &args[0] {
        Value::Set(items) => items,
        other => {
            return Err(RuntimeError::TypeMismatch("Set".to_string(), other.clone()));
        }
    };
    let mut updated = items.to_vec();
    if !updated.contains(&args[1]) {
        updated.push(args[1].clone());
    }
    Ok(Value::Set(updated))
}

pub fn intrinsic_set_has(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.set.has", &args, 2)?;
    let items = match &args[0] {
        Value::Set(items) => items,
        other => {
            return Err(RuntimeError::TypeMismatch("Set".to_string(), other.clone()));
        }
    };
    Ok(Value::Boolean(items.contains(&args[1])))
}

// ── JSON ──

pub fn intrinsic_json_parse(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.json.parse", &args, 1)?;
    let raw = expect_string(&args[0])?;
    let parsed: serde_json::Value = serde_json::from_str(raw)
        .map_err(|e| RuntimeError::Failed(format!("json parse error: {}", e)))?;
    Ok(json_to_value(parsed))
}

pub fn intrinsic_json_stringify(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.json.stringify", &args, 1)?;
    let json = value_to_json(&args[0])?;
    serde_json::to_string(&json)
        .map(Value::String)
        .map_err(|e| RuntimeError::Failed(format!("json stringify error: {}", e)))
}

fn json_to_value(v: serde_json::Value) -> Value {
    match v {
        serde_json::Value::Null => Value::Unit,
        serde_json::Value::Bool(b) => Value::Boolean(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Integer(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => {
            Value::List(items.into_iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(map) => Value::Namespace(
            map.into_iter()
                .map(|(k, v)| (k, json_to_value(v)))
                .collect(),
        ),
    }
}

fn value_to_json(v: &Value) -> Result<serde_json::Value, RuntimeError> {
    match v {
        Value::Integer(i) => Ok(serde_json::Value::from(*i)),
        Value::Float(x) => serde_json::Number::from_f64(*x)
            .map(serde_json::Value::Number)
            .ok_or_else(|| RuntimeError::Failed("non-finite float in json".to_string())),
        Value::String(s) => Ok(serde_json::Value::String(s.clone())),
        Value::Boolean(b) => Ok(serde_json::Value::Bool(*b)),
        Value::Unit | Value::Hole => Ok(serde_json::Value::Null),
        Value::List(items) | Value::Set(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(value_to_json(item)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        Value::Namespace(map) => {
            let mut out = serde_json::Map::new();
            for (k, val) in map {
                out.insert(k.clone(), value_to_json(val)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        other @ (Value::Function(_) | Value::VmFunction(_)) => Err(RuntimeError::TypeMismatch(
            "JSON-serializable value".to_string(),
            other.clone(),
        )),
    }
}

// ── Time ──

pub fn intrinsic_time_now(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.time.now", &args, 0)?;
    Ok(Value::Integer(Utc::now().timestamp_millis()))
}

pub fn intrinsic_time_sleep(_policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.time.sleep", &args, 1)?;
    let millis = expect_integer(&args[0])?;
    if millis < 0 {
        return Err(RuntimeError::TypeMismatch(
            "non-negative Integer".to_string(),
            args[0].clone(),
        ));
    }
    thread::sleep(Duration::from_millis(millis as u64));
    Ok(Value::Unit)
}

// ── Filesystem (sandboxed) ──

pub fn intrinsic_fs_read(policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.fs.read", &args, 1)?;
    let path = expect_string(&args[0])?;
    let canonical = policy.check_path(path, AccessMode::Read)?;
    fs::read_to_string(&canonical)
        .map(Value::String)
        .map_err(|e| RuntimeError::Failed(format!("cannot read '{}': {}", path, e)))
}

pub fn intrinsic_fs_write(policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.fs.write", &args, 2)?;
    let path = expect_string(&args[0])?;
    let content = expect_string(&args[1])?;
    let canonical = policy.check_path(path, AccessMode::Write)?;
    eprintln!("[Ark:FS] Writing to {}", canonical.display());
    fs::write(&canonical, content)
        .map_err(|e| RuntimeError::Failed(format!("cannot write '{}': {}", path, e)))?;
    Ok(Value::Unit)
}

// ── Process (sandboxed) ──

/// Takes an explicit argv list: `sys.exec(["echo", "hi"])`. The child's
/// captured stdout is forwarded to our stdout (clipped at the policy limit)
/// and the capture metadata comes back as a Namespace.
pub fn intrinsic_exec(policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.exec", &args, 1)?;
    let items = expect_list(&args[0])?;
    let mut argv = Vec::with_capacity(items.len());
    for item in items {
        argv.push(expect_string(item)?.to_string());
    }

    let out = sandbox::run_command(policy, &argv).map_err(|e| match e {
        ExecError::Sandbox(v) => RuntimeError::Sandbox(v),
        ExecError::Spawn(program, err) => {
            RuntimeError::Failed(format!("failed to run '{}': {}", program, err))
        }
    })?;

    print!("{}", out.stdout);
    let _ = std::io::stdout().flush();

    let mut meta = HashMap::new();
    meta.insert("stdout".to_string(), Value::String(out.stdout));
    meta.insert("stderr".to_string(), Value::String(out.stderr));
    meta.insert("status".to_string(), Value::Integer(out.status as i64));
    meta.insert("truncated".to_string(), Value::Boolean(out.truncated));
    meta.insert("timed_out".to_string(), Value::Boolean(out.timed_out));
    Ok(Value::Namespace(meta))
}

// ── Network (sandboxed) ──

pub fn intrinsic_http_request(policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    if args.len() != 2 && args.len() != 3 {
        return Err(RuntimeError::Arity("sys.net.http.request".to_string(), 2, args.len()));
    }
    policy.check_capability(Capability::Net)?;

    let method = expect_string(&args[0])?;
    let url = expect_string(&args[1])?;
    let body = match args.get(2) {
        Some(v) => Some(expect_string(v)?.to_string()),
        None => None,
    };

    eprintln!("[Ark:Net] {} {}", method, url);
    let agent = ureq::AgentBuilder::new()
        .timeout(policy.exec_timeout)
        .build();
    let request = agent.request(method, url);
    let result = match body {
        Some(b) => request.send_string(&b),
        None => request.call(),
    };

    let (status, response) = match result {
        Ok(resp) => (resp.status(), resp),
        Err(ureq::Error::Status(code, resp)) => (code, resp),
        Err(ureq::Error::Transport(t)) => {
            return Err(RuntimeError::Failed(format!("http transport error: {}", t)));
        }
    };

    let limit = policy.max_output_kb * 1024;
    let mut raw = Vec::new();
    let mut reader = response.into_reader().take(limit as u64 + 1);
    reader
        .read_to_end(&mut raw)
        .map_err(|e| RuntimeError::Failed(format!("http read error: {}", e)))?;
    let (text, truncated) = sandbox::apply_limit(raw, limit);

    let mut out = HashMap::new();
    out.insert("status".to_string(), Value::Integer(status as i64));
    out.insert("body".to_string(), Value::String(text));
    out.insert("truncated".to_string(), Value::Boolean(truncated));
    Ok(Value::Namespace(out))
}

// ── Crypto (capability-gated) ──

pub fn intrinsic_crypto_hash(policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.crypto.hash", &args, 1)?;
    policy.check_capability(Capability::Crypto)?;
    let data = expect_string(&args[0])?;
    let mut hasher = Sha256::new();
    hasher.update(data.as_bytes());
    Ok(Value::String(hex::encode(hasher.finalize())))
}

pub fn intrinsic_crypto_sha512(policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.crypto.sha512", &args, 1)?;
    policy.check_capability(Capability::Crypto)?;
    let data = expect_string(&args[0])?;
    let mut hasher = Sha512::new();
    hasher.update(data.as_bytes());
    Ok(Value::String(hex::encode(hasher.finalize())))
}

pub fn intrinsic_crypto_hmac_sha512(
    policy: &Policy,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    expect_arity("sys.crypto.hmac_sha512", &args, 2)?;
    policy.check_capability(Capability::Crypto)?;
    let key = decode_hex(&args[0], "key")?;
    let data = expect_string(&args[1])?;
    let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(&key)
        .map_err(|_| RuntimeError::Failed("invalid hmac key".to_string()))?;
    mac.update(data.as_bytes());
    Ok(Value::String(hex::encode(mac.finalize().into_bytes())))
}

pub fn intrinsic_crypto_pbkdf2(policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.crypto.pbkdf2", &args, 3)?;
    policy.check_capability(Capability::Crypto)?;
    let password = expect_string(&args[0])?;
    let salt = expect_string(&args[1])?;
    let iterations = expect_integer(&args[2])?;
    if iterations <= 0 {
        return Err(RuntimeError::TypeMismatch(
            "positive Integer".to_string(),
            args[2].clone(),
        ));
    }
    let mut derived = [0u8; 64];
    pbkdf2::<Hmac<Sha512>>(
        password.as_bytes(),
        salt.as_bytes(),
        iterations as u32,
        &mut derived,
    )
    .map_err(|_| RuntimeError::Failed("pbkdf2 derivation failed".to_string()))?;
    Ok(Value::String(hex::encode(derived)))
}

pub fn intrinsic_crypto_aes_gcm_encrypt(
    policy: &Policy,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    expect_arity("sys.crypto.aes_gcm_encrypt", &args, 3)?;
    policy.check_capability(Capability::Crypto)?;
    let key = decode_hex(&args[0], "32-byte key")?;
    let nonce = decode_hex(&args[1], "12-byte nonce")?;
    let plaintext = expect_string(&args[2])?;
    if nonce.len() != 12 {
        return Err(RuntimeError::TypeMismatch(
            "hex-encoded 12-byte nonce".to_string(),
            args[1].clone(),
        ));
    }
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| {
        RuntimeError::TypeMismatch("hex-encoded 32-byte key".to_string(), args[0].clone())
    })?;
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| RuntimeError::Failed("aes-gcm encryption failed".to_string()))?;
    Ok(Value::String(hex::encode(ciphertext)))
}

pub fn intrinsic_crypto_aes_gcm_decrypt(
    policy: &Policy,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    expect_arity("sys.crypto.aes_gcm_decrypt", &args, 3)?;
    policy.check_capability(Capability::Crypto)?;
    let key = decode_hex(&args[0], "32-byte key")?;
    let nonce = decode_hex(&args[1], "12-byte nonce")?;
    let ciphertext = decode_hex(&args[2], "ciphertext")?;
    if nonce.len() != 12 {
        return Err(RuntimeError::TypeMismatch(
            "hex-encoded 12-byte nonce".to_string(),
            args[1].clone(),
        ));
    }
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| {
        RuntimeError::TypeMismatch("hex-encoded 32-byte key".to_string(), args[0].clone())
    })?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&nonce), ciphertext.as_slice())
        .map_err(|_| RuntimeError::Failed("aes-gcm decryption failed (key/tag mismatch)".to_string()))?;
    Ok(Value::String(String::from_utf8_lossy(&plaintext).into_owned()))
}

pub fn intrinsic_crypto_verify(policy: &Policy, args: Vec<Value>) -> Result<Value, RuntimeError> {
    expect_arity("sys.crypto.verify", &args, 3)?;
    policy.check_capability(Capability::Crypto)?;
    let msg = expect_string(&args[0])?;
    let sig_bytes = decode_hex(&args[1], "64-byte signature")?;
    let key_bytes = decode_hex(&args[2], "32-byte public key")?;

    let sig_arr: [u8; 64] = sig_bytes.as_slice().try_into().map_err(|_| {
        RuntimeError::TypeMismatch("hex-encoded 64-byte signature".to_string(), args[1].clone())
    })?;
    let key_arr: [u8; 32] = key_bytes.as_slice().try_into().map_err(|_| {
        RuntimeError::TypeMismatch("hex-encoded 32-byte public key".to_string(), args[2].clone())
    })?;

    let signature = Signature::from_bytes(&sig_arr);
    // from_bytes rejects weak keys and invalid points.
    let verifying_key = VerifyingKey::from_bytes(&key_arr).map_err(|_| {
        RuntimeError::TypeMismatch("valid ed25519 public key".to_string(), args[2].clone())
    })?;

    Ok(Value::Boolean(
        verifying_key.verify(msg.as_bytes(), &signature).is_ok(),
    ))
}

pub fn intrinsic_crypto_random_bytes(
    policy: &Policy,
    args: Vec<Value>,
) -> Result<Value, RuntimeError> {
    expect_arity("sys.crypto.random_bytes", &args, 1)?;
    policy.check_capability(Capability::Crypto)?;
    let n = expect_integer(&args[0])?;
    if !(0..=1024 * 1024).contains(&n) {
        return Err(RuntimeError::TypeMismatch(
            "Integer in 0..=1048576".to_string(),
            args[0].clone(),
        ));
    }
    let mut buf = vec![0u8; n as usize];
    OsRng.fill_bytes(&mut buf);
    Ok(Value::String(hex::encode(buf)))
}
