//! Generic JavaScript operations
//!
//! The conversions and operators the baseline tier and the slow paths fall
//! back to when an operand is not the type compiled code speculated on.

use std::cmp::Ordering;

use otter_dfg_graph::JsValue;
use otter_dfg_jit::ValueRepresentation;
use otter_dfg_jit::layout::CellType;

use crate::error::VmResult;
use crate::vm::Vm;

/// Relational operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Less,
    LessEq,
    Greater,
    GreaterEq,
}

impl Relation {
    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Relation::Less => ordering == Ordering::Less,
            Relation::LessEq => ordering != Ordering::Greater,
            Relation::Greater => ordering == Ordering::Greater,
            Relation::GreaterEq => ordering != Ordering::Less,
        }
    }
}

/// ECMAScript ToInt32 of a number.
pub fn to_int32(value: f64) -> i32 {
    if !value.is_finite() {
        return 0;
    }
    value.trunc().rem_euclid(4294967296.0) as u64 as u32 as i32
}

/// ECMAScript ToUint32 of a number.
pub fn to_uint32(value: f64) -> u32 {
    to_int32(value) as u32
}

/// Round to the nearest byte, ties to even; NaN becomes 0.
pub fn clamp_to_byte(value: f64) -> u8 {
    if value.is_nan() || value <= 0.0 {
        0
    } else if value >= 255.0 {
        255
    } else {
        value.round_ties_even() as u8
    }
}

/// `Math.min` of two numbers: NaN wins and -0 is below +0.
pub fn js_min(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() { a } else { b }
    } else {
        a.min(b)
    }
}

/// `Math.max` of two numbers.
pub fn js_max(a: f64, b: f64) -> f64 {
    if a.is_nan() || b.is_nan() {
        f64::NAN
    } else if a == b {
        if a.is_sign_negative() { b } else { a }
    } else {
        a.max(b)
    }
}

/// Parse a string the way `Number(s)` does.
pub fn string_to_number(text: &str) -> f64 {
    let text = text.trim_matches(|c: char| c.is_whitespace() || c == '\u{feff}');
    if text.is_empty() {
        return 0.0;
    }
    let radix = |digits: &str, radix| {
        if digits.is_empty() {
            return f64::NAN;
        }
        digits.chars().try_fold(0.0f64, |acc, c| {
            c.to_digit(radix).map(|d| acc * radix as f64 + d as f64)
        })
        .unwrap_or(f64::NAN)
    };
    match text.get(..2) {
        Some("0x" | "0X") => return radix(&text[2..], 16),
        Some("0o" | "0O") => return radix(&text[2..], 8),
        Some("0b" | "0B") => return radix(&text[2..], 2),
        _ => {}
    }
    let (sign, unsigned) = match text.as_bytes()[0] {
        b'-' => (-1.0, &text[1..]),
        b'+' => (1.0, &text[1..]),
        _ => (1.0, text),
    };
    if unsigned == "Infinity" {
        return sign * f64::INFINITY;
    }
    let decimal = unsigned
        .bytes()
        .all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'e' | b'E' | b'+' | b'-'));
    if !decimal || !unsigned.bytes().any(|b| b.is_ascii_digit()) {
        return f64::NAN;
    }
    unsigned.parse::<f64>().map_or(f64::NAN, |n| sign * n)
}

/// Format a number the way `String(n)` does for the common cases.
pub fn number_to_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value == 0.0 {
        return "0".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    let magnitude = value.abs();
    if magnitude >= 1e21 || magnitude < 1e-6 {
        let formatted = format!("{value:e}");
        return match formatted.split_once('e') {
            Some((mantissa, exponent)) if !exponent.starts_with('-') => {
                format!("{mantissa}e+{exponent}")
            }
            _ => formatted,
        };
    }
    format!("{value}")
}

impl<R: ValueRepresentation> Vm<R> {
    /// `typeof`-style name used in error messages.
    pub fn type_name(&self, value: JsValue) -> String {
        match value {
            JsValue::Empty | JsValue::Undefined => "undefined",
            JsValue::Null => "null",
            JsValue::Boolean(_) => "boolean",
            JsValue::Int32(_) | JsValue::Double(_) => "number",
            JsValue::Cell(address) => match self.cell_type(address) {
                Some(CellType::String) => "string",
                Some(CellType::Function) => "function",
                Some(_) => "object",
                None => "undefined",
            },
        }
        .to_string()
    }

    /// ECMAScript ToBoolean.
    pub fn to_boolean(&self, value: JsValue) -> bool {
        match value {
            JsValue::Empty | JsValue::Undefined | JsValue::Null => false,
            JsValue::Boolean(b) => b,
            JsValue::Int32(i) => i != 0,
            JsValue::Double(d) => !(d.is_nan() || d == 0.0),
            JsValue::Cell(address) => match self.cell_type(address) {
                Some(CellType::String) => self.string_length(address) != 0,
                _ => true,
            },
        }
    }

    /// ECMAScript ToNumber; objects convert to NaN.
    pub fn to_number(&self, value: JsValue) -> f64 {
        match value {
            JsValue::Empty | JsValue::Undefined => f64::NAN,
            JsValue::Null => 0.0,
            JsValue::Boolean(b) => b as i32 as f64,
            JsValue::Int32(i) => i as f64,
            JsValue::Double(d) => d,
            JsValue::Cell(_) => match self.string_value(value) {
                Some(text) => string_to_number(&text),
                None => f64::NAN,
            },
        }
    }

    /// ECMAScript ToString; arrays join their elements with commas.
    pub fn to_string(&mut self, value: JsValue) -> VmResult<String> {
        let mut visiting = Vec::new();
        self.to_string_guarded(value, &mut visiting)
    }

    fn to_string_guarded(&mut self, value: JsValue, visiting: &mut Vec<usize>) -> VmResult<String> {
        let text = match value {
            JsValue::Empty | JsValue::Undefined => "undefined".to_string(),
            JsValue::Null => "null".to_string(),
            JsValue::Boolean(b) => b.to_string(),
            JsValue::Int32(i) => i.to_string(),
            JsValue::Double(d) => number_to_string(d),
            JsValue::Cell(address) => match self.cell_type(address) {
                Some(CellType::String) => String::from_utf16_lossy(&self.string_units(address)),
                Some(CellType::Array) => {
                    if visiting.contains(&address) {
                        return Ok(String::new());
                    }
                    visiting.push(address);
                    let mut parts = Vec::new();
                    for index in 0..self.array_length_of(address) {
                        let element = self.get_element(address, index)?;
                        parts.push(match element {
                            JsValue::Undefined | JsValue::Null | JsValue::Empty => String::new(),
                            other => self.to_string_guarded(other, visiting)?,
                        });
                    }
                    visiting.pop();
                    parts.join(",")
                }
                Some(CellType::Function) => "function () { [native code] }".to_string(),
                Some(CellType::Arguments) => "[object Arguments]".to_string(),
                _ => "[object Object]".to_string(),
            },
        };
        Ok(text)
    }

    /// The `+` operator.
    pub fn add(&mut self, lhs: JsValue, rhs: JsValue) -> VmResult<JsValue> {
        if let (JsValue::Int32(a), JsValue::Int32(b)) = (lhs, rhs) {
            return Ok(JsValue::number(a as f64 + b as f64));
        }
        let concatenates = |vm: &Self, v: JsValue| v.as_cell().is_some_and(|c| vm.cell_type(c).is_some());
        if concatenates(self, lhs) || concatenates(self, rhs) {
            let mut text = self.to_string(lhs)?;
            text.push_str(&self.to_string(rhs)?);
            return self.new_string(&text);
        }
        Ok(JsValue::number(self.to_number(lhs) + self.to_number(rhs)))
    }

    /// A relational operator; strings compare by UTF-16 units.
    pub fn compare(&self, relation: Relation, lhs: JsValue, rhs: JsValue) -> bool {
        if let (Some(a), Some(b)) = (lhs.as_cell(), rhs.as_cell()) {
            if self.is_string(lhs) && self.is_string(rhs) {
                return relation.holds(self.string_units(a).cmp(&self.string_units(b)));
            }
        }
        let (a, b) = (self.to_number(lhs), self.to_number(rhs));
        a.partial_cmp(&b).is_some_and(|ordering| relation.holds(ordering))
    }

    /// `===`
    pub fn strict_equals(&self, lhs: JsValue, rhs: JsValue) -> bool {
        match (lhs, rhs) {
            (JsValue::Empty | JsValue::Undefined, JsValue::Empty | JsValue::Undefined) => true,
            (JsValue::Null, JsValue::Null) => true,
            (JsValue::Boolean(a), JsValue::Boolean(b)) => a == b,
            (JsValue::Cell(a), JsValue::Cell(b)) => {
                a == b
                    || (self.is_string(lhs)
                        && self.is_string(rhs)
                        && self.string_units(a) == self.string_units(b))
            }
            _ => match (lhs.as_number(), rhs.as_number()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    /// `==`
    pub fn loose_equals(&self, lhs: JsValue, rhs: JsValue) -> bool {
        let nullish = |v: JsValue| matches!(v, JsValue::Empty | JsValue::Undefined | JsValue::Null);
        if nullish(lhs) || nullish(rhs) {
            return nullish(lhs) && nullish(rhs);
        }
        if let (JsValue::Cell(_), JsValue::Cell(_)) = (lhs, rhs) {
            return self.strict_equals(lhs, rhs);
        }
        if let (JsValue::Boolean(a), JsValue::Boolean(b)) = (lhs, rhs) {
            return a == b;
        }
        let primitive = |vm: &Self, v: JsValue| v.as_cell().is_none() || vm.is_string(v);
        if !primitive(self, lhs) || !primitive(self, rhs) {
            return false;
        }
        self.to_number(lhs) == self.to_number(rhs)
    }
}
