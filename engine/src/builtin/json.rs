//! `JSON.parse`/`JSON.stringify` (spec §4.8), restricted to JSON-compatible
//! values — no reviver/replacer function support (out of scope per spec
//! §1); needed for the round-trip law of §8.2.

use std::rc::Rc;

use crate::agent::{Agent, Heap};
use crate::atom::AtomTable;
use crate::error::{JsResult, ThrowCompletion};
use crate::object::PropertyKey;
use crate::realm::Realm;
use crate::value::Value;

pub fn install(heap: &mut Heap, atoms: &mut AtomTable, realm: &Realm) {
    let json_obj = {
        let id = heap.objects.alloc(crate::object::ObjectData::ordinary(Some(realm.object_proto)));
        let atom = atoms.intern("JSON");
        heap.objects
            .get_mut(realm.global_object)
            .hash
            .insert(atom, crate::property::StoredProperty::data(Value::Object(id), true, false, true));
        id
    };

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        json_obj,
        "stringify",
        Rc::new(|agent, _this, args| {
            let value = args.first().copied().unwrap_or(Value::Undefined);
            let mut out = String::new();
            stringify(agent, value, &mut out)?;
            Ok(agent.intern_heap_string(&out))
        }),
    );

    Realm::install_native(
        heap,
        atoms,
        realm.function_proto,
        json_obj,
        "parse",
        Rc::new(|agent, _this, args| {
            let text = match args.first() {
                Some(v) => agent.value_to_string_lossy(*v),
                None => return Err(ThrowCompletion(agent.make_syntax_error("Unexpected end of JSON input"))),
            };
            let mut parser = JsonParser { bytes: text.as_bytes(), pos: 0 };
            parser.skip_ws();
            let value = parser.parse_value(agent)?;
            parser.skip_ws();
            if parser.pos != parser.bytes.len() {
                return Err(ThrowCompletion(agent.make_syntax_error("Unexpected token in JSON")));
            }
            Ok(value)
        }),
    );
}

fn stringify(agent: &mut Agent, value: Value, out: &mut String) -> JsResult<()> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Undefined => out.push_str("null"),
        Value::Boolean(b) => out.push_str(if b { "true" } else { "false" }),
        Value::Number(n) => {
            if n.is_finite() {
                out.push_str(&crate::string::number_to_string(n));
            } else {
                out.push_str("null");
            }
        }
        Value::String(_) => {
            let s = agent.value_to_string_lossy(value);
            stringify_string(&s, out);
        }
        Value::Array(id) => {
            let elements = agent.heap.arrays.get(id).elements().to_vec();
            out.push('[');
            for (i, v) in elements.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                stringify(agent, v, out)?;
            }
            out.push(']');
        }
        Value::Object(id) => {
            let keys = crate::object::own_enumerable_keys(agent, id);
            out.push('{');
            for (i, atom) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let name = agent.atoms.resolve(atom).to_string();
                stringify_string(&name, out);
                out.push(':');
                let v = crate::object::get_property(agent, id, PropertyKey::Atom(atom))?;
                stringify(agent, v, out)?;
            }
            out.push('}');
        }
        _ => out.push_str("null"),
    }
    Ok(())
}

fn stringify_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

struct JsonParser<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> JsonParser<'a> {
    fn skip_ws(&mut self) {
        while let Some(&b) = self.bytes.get(self.pos) {
            if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn expect(&mut self, agent: &mut Agent, lit: &str) -> JsResult<()> {
        if self.bytes[self.pos..].starts_with(lit.as_bytes()) {
            self.pos += lit.len();
            Ok(())
        } else {
            Err(ThrowCompletion(agent.make_syntax_error("Unexpected token in JSON")))
        }
    }

    fn parse_value(&mut self, agent: &mut Agent) -> JsResult<Value> {
        self.skip_ws();
        match self.peek() {
            Some(b'{') => self.parse_object(agent),
            Some(b'[') => self.parse_array(agent),
            Some(b'"') => self.parse_string(agent).map(|s| agent.intern_heap_string(&s)),
            Some(b't') => {
                self.expect(agent, "true")?;
                Ok(Value::Boolean(true))
            }
            Some(b'f') => {
                self.expect(agent, "false")?;
                Ok(Value::Boolean(false))
            }
            Some(b'n') => {
                self.expect(agent, "null")?;
                Ok(Value::Null)
            }
            Some(b) if b == b'-' || b.is_ascii_digit() => self.parse_number(agent),
            _ => Err(ThrowCompletion(agent.make_syntax_error("Unexpected token in JSON"))),
        }
    }

    fn parse_number(&mut self, agent: &mut Agent) -> JsResult<Value> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') {
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos]).unwrap();
        match text.parse::<f64>() {
            Ok(n) => Ok(Value::Number(n)),
            Err(_) => Err(ThrowCompletion(agent.make_syntax_error("Invalid number in JSON"))),
        }
    }

    fn parse_string(&mut self, agent: &mut Agent) -> JsResult<String> {
        if self.peek() != Some(b'"') {
            return Err(ThrowCompletion(agent.make_syntax_error("Expected string in JSON")));
        }
        self.pos += 1;
        let mut out = String::new();
        loop {
            match self.peek() {
                None => return Err(ThrowCompletion(agent.make_syntax_error("Unterminated string in JSON"))),
                Some(b'"') => {
                    self.pos += 1;
                    return Ok(out);
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b'"') => {
                            out.push('"');
                            self.pos += 1;
                        }
                        Some(b'\\') => {
                            out.push('\\');
                            self.pos += 1;
                        }
                        Some(b'/') => {
                            out.push('/');
                            self.pos += 1;
                        }
                        Some(b'n') => {
                            out.push('\n');
                            self.pos += 1;
                        }
                        Some(b't') => {
                            out.push('\t');
                            self.pos += 1;
                        }
                        Some(b'r') => {
                            out.push('\r');
                            self.pos += 1;
                        }
                        Some(b'b') => {
                            out.push('\u{8}');
                            self.pos += 1;
                        }
                        Some(b'f') => {
                            out.push('\u{c}');
                            self.pos += 1;
                        }
                        Some(b'u') => {
                            self.pos += 1;
                            let hex = std::str::from_utf8(&self.bytes[self.pos..self.pos + 4]).unwrap_or("0000");
                            let code = u32::from_str_radix(hex, 16).unwrap_or(0);
                            if let Some(c) = char::from_u32(code) {
                                out.push(c);
                            }
                            self.pos += 4;
                        }
                        _ => return Err(ThrowCompletion(agent.make_syntax_error("Invalid escape in JSON string"))),
                    }
                }
                Some(_) => {
                    let rest = std::str::from_utf8(&self.bytes[self.pos..]).unwrap_or("");
                    let c = rest.chars().next().unwrap();
                    out.push(c);
                    self.pos += c.len_utf8();
                }
            }
        }
    }

    fn parse_array(&mut self, agent: &mut Agent) -> JsResult<Value> {
        self.pos += 1; // '['
        let mut elements = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(agent.alloc_array(elements));
        }
        loop {
            let v = self.parse_value(agent)?;
            elements.push(v);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    self.skip_ws();
                }
                Some(b']') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(ThrowCompletion(agent.make_syntax_error("Unexpected token in JSON array"))),
            }
        }
        Ok(agent.alloc_array(elements))
    }

    fn parse_object(&mut self, agent: &mut Agent) -> JsResult<Value> {
        self.pos += 1; // '{'
        let result = agent.alloc_plain_object();
        let Value::Object(id) = result else { unreachable!() };
        self.skip_ws();
        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(result);
        }
        loop {
            self.skip_ws();
            let key = self.parse_string(agent)?;
            self.skip_ws();
            if self.peek() != Some(b':') {
                return Err(ThrowCompletion(agent.make_syntax_error("Expected ':' in JSON object")));
            }
            self.pos += 1;
            let value = self.parse_value(agent)?;
            let atom = agent.atoms.intern(&key);
            crate::object::set_property(agent, id, PropertyKey::Atom(atom), value)?;
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                }
                Some(b'}') => {
                    self.pos += 1;
                    break;
                }
                _ => return Err(ThrowCompletion(agent.make_syntax_error("Unexpected token in JSON object"))),
            }
        }
        Ok(result)
    }
}
