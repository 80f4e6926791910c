// Built-in functions callable from pattern source
use super::*;

use tracing::info;

use pattern::bytes_to_u128;
use value::sign_extend;

pub(crate) type BuiltinFn = fn(&mut Evaluator<'_>, &[Value]) -> Result<Option<Value>, EvalError>;

const BUILTINS: &[(&str, BuiltinFn)] = &[
    ("std::print", print),
    ("std::format", format),
    ("std::assert", assert),
    ("std::mem::size", mem_size),
    ("std::mem::eof", mem_eof),
    ("std::mem::read_unsigned", read_unsigned),
    ("std::mem::read_signed", read_signed),
];

pub(crate) fn lookup(name: &str) -> Option<BuiltinFn> {
    BUILTINS
        .iter()
        .find(|(builtin, _)| *builtin == name)
        .map(|(_, f)| *f)
}

fn check_arity(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        let expected = if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        };
        return Err(EvalError::new(format!(
            "function '{}' expects {} parameter(s), got {}",
            name,
            expected,
            args.len()
        )));
    }
    Ok(())
}

fn print(eval: &mut Evaluator<'_>, args: &[Value]) -> Result<Option<Value>, EvalError> {
    check_arity("std::print", args, 1, usize::MAX)?;
    let line = format_template(&args[0].to_display_string(), &args[1..])?;
    info!(target: "hexpat::console", "{}", line);
    eval.console.push(line);
    Ok(None)
}

fn format(_: &mut Evaluator<'_>, args: &[Value]) -> Result<Option<Value>, EvalError> {
    check_arity("std::format", args, 1, usize::MAX)?;
    let text = format_template(&args[0].to_display_string(), &args[1..])?;
    Ok(Some(Value::String(text)))
}

fn assert(_: &mut Evaluator<'_>, args: &[Value]) -> Result<Option<Value>, EvalError> {
    check_arity("std::assert", args, 2, 2)?;
    if !args[0].to_bool()? {
        return Err(EvalError::new(format!(
            "assertion failed: {}",
            args[1].to_display_string()
        )));
    }
    Ok(None)
}

fn mem_size(eval: &mut Evaluator<'_>, args: &[Value]) -> Result<Option<Value>, EvalError> {
    check_arity("std::mem::size", args, 0, 0)?;
    Ok(Some(Value::Unsigned(u128::from(eval.data.size()))))
}

fn mem_eof(eval: &mut Evaluator<'_>, args: &[Value]) -> Result<Option<Value>, EvalError> {
    check_arity("std::mem::eof", args, 0, 0)?;
    Ok(Some(Value::Bool(eval.offset >= eval.data.size())))
}

/// Shared argument handling for the `read_*` builtins: offset, size, and
/// an optional endianness selector (0 default, 1 big, 2 little)
fn read_raw(eval: &Evaluator<'_>, name: &str, args: &[Value]) -> Result<(u128, u32), EvalError> {
    check_arity(name, args, 2, 3)?;
    let offset = args[0].to_unsigned()?;
    let offset = u64::try_from(offset)
        .map_err(|_| EvalError::new(format!("read offset 0x{:X} is out of range", offset)))?;
    let size = args[1].to_unsigned()?;
    if !(1..=16).contains(&size) {
        return Err(EvalError::new(format!("invalid read size {}", size)));
    }
    let endian = match args.get(2).map(Value::to_unsigned).transpose()? {
        None | Some(0) => eval.default_endian(),
        Some(1) => Endianness::Big,
        Some(2) => Endianness::Little,
        Some(other) => return Err(EvalError::new(format!("invalid endianness {}", other))),
    };
    let bytes = eval.data.read_bytes(offset, size as u64)?;
    Ok((bytes_to_u128(&bytes, endian), size as u32))
}

fn read_unsigned(eval: &mut Evaluator<'_>, args: &[Value]) -> Result<Option<Value>, EvalError> {
    let (raw, _) = read_raw(eval, "std::mem::read_unsigned", args)?;
    Ok(Some(Value::Unsigned(raw)))
}

fn read_signed(eval: &mut Evaluator<'_>, args: &[Value]) -> Result<Option<Value>, EvalError> {
    let (raw, size) = read_raw(eval, "std::mem::read_signed", args)?;
    Ok(Some(Value::Signed(sign_extend(raw, size * 8))))
}

/// Substitute `{}` placeholders. A placeholder may carry a spec such as
/// `{:x}`, `{:#X}`, `{:08b}` or `{:o}`; `{{` and `}}` are literal braces.
fn format_template(template: &str, args: &[Value]) -> Result<String, EvalError> {
    let mut out = String::with_capacity(template.len());
    let mut args = args.iter();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut spec = String::new();
                loop {
                    match chars.next() {
                        Some('}') => break,
                        Some(c) => spec.push(c),
                        None => return Err(EvalError::new("unterminated '{' in format string")),
                    }
                }
                let arg = args
                    .next()
                    .ok_or_else(|| EvalError::new("not enough arguments for format string"))?;
                format_arg(&mut out, &spec, arg)?;
            }
            c => out.push(c),
        }
    }
    Ok(out)
}

fn format_arg(out: &mut String, spec: &str, arg: &Value) -> Result<(), EvalError> {
    let invalid = || EvalError::new(format!("invalid format specifier '{{{}}}'", spec));
    let Some(spec) = spec.strip_prefix(':') else {
        if !spec.is_empty() {
            return Err(invalid());
        }
        out.push_str(&arg.to_display_string());
        return Ok(());
    };

    let (alternate, spec) = match spec.strip_prefix('#') {
        Some(rest) => (true, rest),
        None => (false, spec),
    };
    let zero = spec.starts_with('0');
    let digits = spec.chars().take_while(|c| c.is_ascii_digit()).count();
    let width: usize = if digits == 0 {
        0
    } else {
        spec[..digits].parse().map_err(|_| invalid())?
    };
    let kind = &spec[digits..];

    let (text, prefix) = match kind {
        "" | "d" => (arg.to_display_string(), ""),
        "x" => (format!("{:x}", arg.to_unsigned()?), "0x"),
        "X" => (format!("{:X}", arg.to_unsigned()?), "0x"),
        "b" => (format!("{:b}", arg.to_unsigned()?), "0b"),
        "o" => (format!("{:o}", arg.to_unsigned()?), "0o"),
        _ => return Err(invalid()),
    };
    let prefix = if alternate { prefix } else { "" };
    let padding = width.saturating_sub(prefix.len() + text.chars().count());
    if zero {
        out.push_str(prefix);
        out.extend(std::iter::repeat('0').take(padding));
    } else {
        out.extend(std::iter::repeat(' ').take(padding));
        out.push_str(prefix);
    }
    out.push_str(&text);
    Ok(())
}
