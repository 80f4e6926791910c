// Runtime value type for the pattern language evaluator

use std::fmt;

use crate::error::EvalError;
use crate::eval::pattern::PatternNode;
use crate::parser::ast::{BinOp, BuiltinType, Endianness, UnaryOp};

/// Runtime value during evaluation.
///
/// Integers are held widened to 128 bits; the declared width only matters
/// when a value is cast or stored into a typed variable.
#[derive(Debug, Clone)]
pub enum Value {
    Unsigned(u128),
    Signed(i128),
    Float(f64),
    Bool(bool),
    Char(char),
    String(String),
    /// A compound pattern used as a value (struct, union, array, ...)
    Pattern(Box<PatternNode>),
}

impl Value {
    /// Zero value of a builtin type
    pub fn zero(ty: BuiltinType) -> Value {
        match ty {
            t if t.is_signed() => Value::Signed(0),
            t if t.is_float() => Value::Float(0.0),
            BuiltinType::Bool => Value::Bool(false),
            BuiltinType::Char | BuiltinType::Char16 => Value::Char('\0'),
            BuiltinType::Str => Value::String(String::new()),
            _ => Value::Unsigned(0),
        }
    }

    /// Short name of the variant, for diagnostics
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Unsigned(_) => "unsigned integer",
            Value::Signed(_) => "signed integer",
            Value::Float(_) => "floating point value",
            Value::Bool(_) => "bool",
            Value::Char(_) => "char",
            Value::String(_) => "string",
            Value::Pattern(_) => "pattern",
        }
    }

    /// Integers, bools and chars
    pub fn is_integral(&self) -> bool {
        matches!(
            self,
            Value::Unsigned(_) | Value::Signed(_) | Value::Bool(_) | Value::Char(_)
        )
    }

    /// Raw two's complement bits
    #[inline]
    pub fn to_unsigned(&self) -> Result<u128, EvalError> {
        match self {
            Value::Unsigned(v) => Ok(*v),
            Value::Signed(v) => Ok(*v as u128),
            Value::Float(v) if *v < 0.0 => Ok(*v as i128 as u128),
            Value::Float(v) => Ok(*v as u128),
            Value::Bool(v) => Ok(u128::from(*v)),
            Value::Char(v) => Ok(*v as u128),
            _ => Err(EvalError::new(format!(
                "cannot convert {} to an integer",
                self.kind_name()
            ))),
        }
    }

    #[inline]
    pub fn to_signed(&self) -> Result<i128, EvalError> {
        match self {
            Value::Unsigned(v) => Ok(*v as i128),
            Value::Signed(v) => Ok(*v),
            Value::Float(v) => Ok(*v as i128),
            Value::Bool(v) => Ok(i128::from(*v)),
            Value::Char(v) => Ok(*v as i128),
            _ => Err(EvalError::new(format!(
                "cannot convert {} to an integer",
                self.kind_name()
            ))),
        }
    }

    pub fn to_float(&self) -> Result<f64, EvalError> {
        match self {
            Value::Unsigned(v) => Ok(*v as f64),
            Value::Signed(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            Value::Bool(v) => Ok(if *v { 1.0 } else { 0.0 }),
            Value::Char(v) => Ok(*v as u32 as f64),
            _ => Err(EvalError::new(format!(
                "cannot convert {} to a floating point value",
                self.kind_name()
            ))),
        }
    }

    /// Truthiness: non-zero numbers and non-empty strings are true
    #[inline]
    pub fn to_bool(&self) -> Result<bool, EvalError> {
        match self {
            Value::Unsigned(v) => Ok(*v != 0),
            Value::Signed(v) => Ok(*v != 0),
            Value::Float(v) => Ok(*v != 0.0),
            Value::Bool(v) => Ok(*v),
            Value::Char(v) => Ok(*v != '\0'),
            Value::String(s) => Ok(!s.is_empty()),
            Value::Pattern(_) => Err(EvalError::new("cannot use a pattern as a boolean")),
        }
    }

    pub fn to_char(&self) -> Result<char, EvalError> {
        match self {
            Value::Char(c) => Ok(*c),
            other => {
                let code = other.to_unsigned()? as u32;
                Ok(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER))
            }
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Unsigned(v) => v.to_string(),
            Value::Signed(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Bool(v) => v.to_string(),
            Value::Char(v) => v.to_string(),
            Value::String(v) => v.clone(),
            Value::Pattern(node) => format!("{} {}", node.type_name, node.display()),
        }
    }

    /// Convert to a builtin type: integers truncate or sign-extend to the
    /// type's width, and big endian byte-swaps within that width.
    pub fn cast(&self, ty: BuiltinType, endian: Endianness) -> Result<Value, EvalError> {
        match ty {
            BuiltinType::Auto => Ok(self.clone()),
            BuiltinType::Str => Ok(Value::String(self.to_display_string())),
            BuiltinType::Bool => Ok(Value::Bool(self.to_bool()?)),
            BuiltinType::Float => Ok(Value::Float(self.to_float()? as f32 as f64)),
            BuiltinType::Double => Ok(Value::Float(self.to_float()?)),
            BuiltinType::Char => {
                let code = self.to_unsigned()? & 0xFF;
                Ok(Value::Char(char::from(code as u8)))
            }
            BuiltinType::Char16 => {
                let code = width_bits(self.to_unsigned()?, 2, endian);
                Ok(Value::Char(
                    char::from_u32(code as u32).unwrap_or(char::REPLACEMENT_CHARACTER),
                ))
            }
            t => {
                let size = t.size().unwrap_or(16) as u32;
                let raw = width_bits(self.to_unsigned()?, size, endian);
                if t.is_signed() {
                    Ok(Value::Signed(sign_extend(raw, size * 8)))
                } else {
                    Ok(Value::Unsigned(raw))
                }
            }
        }
    }

    /// Apply a binary operator. `&&` and `||` short-circuit in the
    /// evaluator before reaching here.
    pub fn binary(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
        if matches!(lhs, Value::Pattern(_)) || matches!(rhs, Value::Pattern(_)) {
            return Err(invalid_operands(op, lhs, rhs));
        }

        match op {
            BinOp::LogAnd => return Ok(Value::Bool(lhs.to_bool()? && rhs.to_bool()?)),
            BinOp::LogOr => return Ok(Value::Bool(lhs.to_bool()? || rhs.to_bool()?)),
            BinOp::LogXor => return Ok(Value::Bool(lhs.to_bool()? ^ rhs.to_bool()?)),
            _ => {}
        }

        if matches!(lhs, Value::String(_)) || matches!(rhs, Value::String(_)) {
            return string_op(op, lhs, rhs);
        }

        if matches!(lhs, Value::Float(_)) || matches!(rhs, Value::Float(_)) {
            return float_op(op, lhs, rhs);
        }

        macro_rules! int_binary_op {
            ($op:expr, $l:expr, $r:expr, $variant:ident) => {
                match $op {
                    BinOp::Add => Ok(Value::$variant($l.wrapping_add($r))),
                    BinOp::Sub => Ok(Value::$variant($l.wrapping_sub($r))),
                    BinOp::Mul => Ok(Value::$variant($l.wrapping_mul($r))),
                    BinOp::Div if $r == 0 => Err(EvalError::new("division by zero")),
                    BinOp::Div => Ok(Value::$variant($l.wrapping_div($r))),
                    BinOp::Mod if $r == 0 => Err(EvalError::new("modulo by zero")),
                    BinOp::Mod => Ok(Value::$variant($l.wrapping_rem($r))),
                    BinOp::BitAnd => Ok(Value::$variant($l & $r)),
                    BinOp::BitOr => Ok(Value::$variant($l | $r)),
                    BinOp::BitXor => Ok(Value::$variant($l ^ $r)),
                    BinOp::Shl => Ok(Value::$variant($l.wrapping_shl($r as u32))),
                    BinOp::Shr => Ok(Value::$variant($l.wrapping_shr($r as u32))),
                    BinOp::Eq => Ok(Value::Bool($l == $r)),
                    BinOp::Ne => Ok(Value::Bool($l != $r)),
                    BinOp::Lt => Ok(Value::Bool($l < $r)),
                    BinOp::Gt => Ok(Value::Bool($l > $r)),
                    BinOp::Le => Ok(Value::Bool($l <= $r)),
                    BinOp::Ge => Ok(Value::Bool($l >= $r)),
                    BinOp::LogAnd | BinOp::LogOr | BinOp::LogXor => {
                        unreachable!("logical operators handled above")
                    }
                }
            };
        }

        // Mixed signedness promotes to signed
        if matches!(lhs, Value::Signed(_)) || matches!(rhs, Value::Signed(_)) {
            let l = lhs.to_signed()?;
            let r = rhs.to_signed()?;
            return int_binary_op!(op, l, r, Signed);
        }

        let l = lhs.to_unsigned()?;
        let r = rhs.to_unsigned()?;
        int_binary_op!(op, l, r, Unsigned)
    }

    pub fn unary(op: UnaryOp, value: &Value) -> Result<Value, EvalError> {
        let invalid = || {
            EvalError::new(format!(
                "invalid operand {} for operator '{}'",
                value.kind_name(),
                op.symbol()
            ))
        };
        match (op, value) {
            (UnaryOp::Not, v) => Ok(Value::Bool(!v.to_bool()?)),
            (_, Value::String(_) | Value::Pattern(_)) => Err(invalid()),
            (UnaryOp::Plus, v) => Ok(v.clone()),
            (UnaryOp::Neg, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOp::Neg, v) => Ok(Value::Signed(v.to_signed()?.wrapping_neg())),
            (UnaryOp::BitNot, Value::Float(_)) => Err(invalid()),
            (UnaryOp::BitNot, Value::Bool(b)) => Ok(Value::Bool(!b)),
            (UnaryOp::BitNot, Value::Signed(v)) => Ok(Value::Signed(!v)),
            (UnaryOp::BitNot, v) => Ok(Value::Unsigned(!v.to_unsigned()?)),
        }
    }
}

fn invalid_operands(op: BinOp, lhs: &Value, rhs: &Value) -> EvalError {
    EvalError::new(format!(
        "invalid operands {} and {} for operator '{}'",
        lhs.kind_name(),
        rhs.kind_name(),
        op.symbol()
    ))
}

fn string_op(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    match (op, lhs, rhs) {
        (BinOp::Add, Value::String(_) | Value::Char(_), Value::String(_) | Value::Char(_)) => Ok(
            Value::String(format!("{}{}", lhs.to_display_string(), rhs.to_display_string())),
        ),
        (BinOp::Eq, Value::String(a), Value::String(b)) => Ok(Value::Bool(a == b)),
        (BinOp::Ne, Value::String(a), Value::String(b)) => Ok(Value::Bool(a != b)),
        (BinOp::Mul, Value::String(s), n) | (BinOp::Mul, n, Value::String(s))
            if n.is_integral() =>
        {
            let count = usize::try_from(n.to_unsigned()?)
                .map_err(|_| EvalError::new("string repetition count too large"))?;
            Ok(Value::String(s.repeat(count)))
        }
        _ => Err(invalid_operands(op, lhs, rhs)),
    }
}

fn float_op(op: BinOp, lhs: &Value, rhs: &Value) -> Result<Value, EvalError> {
    let l = lhs.to_float()?;
    let r = rhs.to_float()?;
    match op {
        BinOp::Add => Ok(Value::Float(l + r)),
        BinOp::Sub => Ok(Value::Float(l - r)),
        BinOp::Mul => Ok(Value::Float(l * r)),
        BinOp::Div if r == 0.0 => Err(EvalError::new("division by zero")),
        BinOp::Div => Ok(Value::Float(l / r)),
        BinOp::Mod if r == 0.0 => Err(EvalError::new("modulo by zero")),
        BinOp::Mod => Ok(Value::Float(l % r)),
        BinOp::Eq => Ok(Value::Bool(l == r)),
        BinOp::Ne => Ok(Value::Bool(l != r)),
        BinOp::Lt => Ok(Value::Bool(l < r)),
        BinOp::Gt => Ok(Value::Bool(l > r)),
        BinOp::Le => Ok(Value::Bool(l <= r)),
        BinOp::Ge => Ok(Value::Bool(l >= r)),
        _ => Err(invalid_operands(op, lhs, rhs)),
    }
}

/// Truncate `raw` to `size` bytes, byte-swapping within that width for big endian
pub(crate) fn width_bits(raw: u128, size: u32, endian: Endianness) -> u128 {
    let bits = size * 8;
    let masked = if bits >= 128 { raw } else { raw & ((1u128 << bits) - 1) };
    match endian {
        Endianness::Little => masked,
        Endianness::Big if bits >= 128 => masked.swap_bytes(),
        Endianness::Big => masked.swap_bytes() >> (128 - bits),
    }
}

/// Sign-extend the low `bits` bits of `raw`
pub(crate) fn sign_extend(raw: u128, bits: u32) -> i128 {
    if bits == 0 || bits >= 128 {
        return raw as i128;
    }
    let shift = 128 - bits;
    ((raw << shift) as i128) >> shift
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display_string())
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unsigned(a), Value::Unsigned(b)) => a == b,
            (Value::Signed(a), Value::Signed(b)) => a == b,
            (Value::Unsigned(a), Value::Signed(b)) => (*a as i128) == *b,
            (Value::Signed(a), Value::Unsigned(b)) => *a == (*b as i128),
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Char(a), Value::Char(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Pattern(a), Value::Pattern(b)) => a == b,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bin(op: BinOp, l: Value, r: Value) -> Result<Value, EvalError> {
        Value::binary(op, &l, &r)
    }

    #[test]
    fn test_mixed_signedness_is_signed() {
        let v = bin(BinOp::Sub, Value::Unsigned(1), Value::Signed(3)).unwrap();
        assert!(matches!(v, Value::Signed(-2)));
    }

    #[test]
    fn test_unsigned_wraps() {
        let v = bin(BinOp::Sub, Value::Unsigned(0), Value::Unsigned(1)).unwrap();
        assert_eq!(v, Value::Unsigned(u128::MAX));
        let v = bin(BinOp::Mul, Value::Signed(i128::MAX), Value::Signed(2)).unwrap();
        assert_eq!(v, Value::Signed(-2));
    }

    #[test]
    fn test_shift_wraps_modulo_128() {
        let v = bin(BinOp::Shl, Value::Unsigned(1), Value::Unsigned(130)).unwrap();
        assert_eq!(v, Value::Unsigned(4));
    }

    #[test]
    fn test_division_truncates_toward_zero() {
        let v = bin(BinOp::Div, Value::Signed(-7), Value::Signed(2)).unwrap();
        assert_eq!(v, Value::Signed(-3));
        let v = bin(BinOp::Mod, Value::Signed(-7), Value::Signed(2)).unwrap();
        assert_eq!(v, Value::Signed(-1));
    }

    #[test]
    fn test_division_by_zero_is_fatal() {
        let err = bin(BinOp::Div, Value::Unsigned(1), Value::Unsigned(0)).unwrap_err();
        assert_eq!(err.message, "division by zero");
        assert!(bin(BinOp::Mod, Value::Signed(1), Value::Signed(0)).is_err());
        assert!(bin(BinOp::Div, Value::Float(1.0), Value::Float(0.0)).is_err());
    }

    #[test]
    fn test_bitwise_requires_integers() {
        let err = bin(BinOp::BitAnd, Value::Float(1.0), Value::Unsigned(1)).unwrap_err();
        assert!(err.message.contains("'&'"), "{}", err.message);
        let err = bin(BinOp::Shl, Value::String("a".into()), Value::Unsigned(1)).unwrap_err();
        assert!(err.message.contains("'<<'"), "{}", err.message);
        // bool and char count as integers
        let v = bin(BinOp::BitOr, Value::Bool(true), Value::Char('\u{2}')).unwrap();
        assert_eq!(v, Value::Unsigned(3));
    }

    #[test]
    fn test_string_operators() {
        let v = bin(BinOp::Add, Value::String("ab".into()), Value::Char('c')).unwrap();
        assert_eq!(v, Value::String("abc".into()));
        let v = bin(BinOp::Mul, Value::String("ab".into()), Value::Unsigned(3)).unwrap();
        assert_eq!(v, Value::String("ababab".into()));
        let v = bin(BinOp::Eq, Value::String("x".into()), Value::String("x".into())).unwrap();
        assert_eq!(v, Value::Bool(true));
        assert!(bin(BinOp::Sub, Value::String("x".into()), Value::Unsigned(1)).is_err());
    }

    #[test]
    fn test_comparison_domains() {
        // signed comparison when either side is signed
        let v = bin(BinOp::Lt, Value::Signed(-1), Value::Unsigned(1)).unwrap();
        assert_eq!(v, Value::Bool(true));
        // unsigned otherwise
        let v = bin(BinOp::Gt, Value::Unsigned(u128::MAX), Value::Unsigned(1)).unwrap();
        assert_eq!(v, Value::Bool(true));
        let v = bin(BinOp::Ge, Value::Float(1.5), Value::Unsigned(1)).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn test_truthiness() {
        assert!(Value::String("x".into()).to_bool().unwrap());
        assert!(!Value::String(String::new()).to_bool().unwrap());
        assert!(!Value::Float(0.0).to_bool().unwrap());
        let v = bin(BinOp::LogXor, Value::Unsigned(2), Value::Bool(false)).unwrap();
        assert_eq!(v, Value::Bool(true));
    }

    #[test]
    fn test_unary() {
        assert_eq!(
            Value::unary(UnaryOp::Neg, &Value::Unsigned(5)).unwrap(),
            Value::Signed(-5)
        );
        assert_eq!(
            Value::unary(UnaryOp::BitNot, &Value::Unsigned(0)).unwrap(),
            Value::Unsigned(u128::MAX)
        );
        assert_eq!(
            Value::unary(UnaryOp::Not, &Value::Unsigned(0)).unwrap(),
            Value::Bool(true)
        );
        assert!(Value::unary(UnaryOp::BitNot, &Value::Float(1.0)).is_err());
    }

    #[test]
    fn test_cast_truncates_and_sign_extends() {
        let v = Value::Unsigned(0x1FF).cast(BuiltinType::U8, Endianness::Little).unwrap();
        assert_eq!(v, Value::Unsigned(0xFF));
        let v = Value::Unsigned(0xFF).cast(BuiltinType::S8, Endianness::Little).unwrap();
        assert_eq!(v, Value::Signed(-1));
        let v = Value::Signed(-1).cast(BuiltinType::U16, Endianness::Little).unwrap();
        assert_eq!(v, Value::Unsigned(0xFFFF));
        let v = Value::Unsigned(0xABCDEF).cast(BuiltinType::S24, Endianness::Little).unwrap();
        assert_eq!(v, Value::Signed(0xABCDEF - 0x1000000));
    }

    #[test]
    fn test_cast_big_endian_swaps_within_width() {
        let v = Value::Unsigned(0x1234).cast(BuiltinType::U16, Endianness::Big).unwrap();
        assert_eq!(v, Value::Unsigned(0x3412));
        let v = Value::Unsigned(0x0001_0203).cast(BuiltinType::U32, Endianness::Big).unwrap();
        assert_eq!(v, Value::Unsigned(0x0302_0100));
    }

    #[test]
    fn test_cast_other_kinds() {
        assert_eq!(
            Value::Unsigned(0x41).cast(BuiltinType::Char, Endianness::Little).unwrap(),
            Value::Char('A')
        );
        assert_eq!(
            Value::Unsigned(2).cast(BuiltinType::Bool, Endianness::Little).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            Value::Unsigned(3).cast(BuiltinType::Double, Endianness::Little).unwrap(),
            Value::Float(3.0)
        );
        assert_eq!(
            Value::Unsigned(7).cast(BuiltinType::Str, Endianness::Little).unwrap(),
            Value::String("7".into())
        );
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(Value::zero(BuiltinType::S32), Value::Signed(0));
        assert_eq!(Value::zero(BuiltinType::U8), Value::Unsigned(0));
        assert_eq!(Value::zero(BuiltinType::Double), Value::Float(0.0));
        assert_eq!(Value::zero(BuiltinType::Char), Value::Char('\0'));
    }
}
