// Attribute application and formatter/transform dispatch
use super::*;

use tracing::trace;

use crate::parser::ast::Attribute;
use pattern::PatternKind;

/// Known attributes and whether each one requires a value
const KNOWN_ATTRIBUTES: &[(&str, bool)] = &[
    ("color", true),
    ("name", true),
    ("comment", true),
    ("hidden", false),
    ("inline", false),
    ("format", true),
    ("transform", true),
    ("pointer_base", true),
];

/// Parse `RRGGBB` or `RRGGBBAA` into the little-endian packed form
/// used by display layers (red in the low byte)
pub(crate) fn parse_color(text: &str) -> Result<u32, EvalError> {
    let invalid = || EvalError::new(format!("invalid color value '{}'", text));
    if !text.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let raw = u32::from_str_radix(text, 16).map_err(|_| invalid())?;
    match text.len() {
        6 => Ok(raw.swap_bytes() >> 8),
        8 => Ok(raw.swap_bytes()),
        _ => Err(invalid()),
    }
}

impl<'a> Evaluator<'a> {
    /// Apply attributes to a freshly built node. Returns whether the node's
    /// children should be spliced into the enclosing scope.
    pub(crate) fn apply_attributes(
        &mut self,
        node: &mut PatternNode,
        attrs: &[Attribute],
    ) -> Result<bool, EvalError> {
        let saved = self.offset;
        let mut inline = false;
        for attr in attrs {
            let applied = self
                .apply_attribute(node, attr)
                .map_err(|e| e.with_line_if_none(attr.span.line));
            self.offset = saved;
            inline |= applied?;
        }
        Ok(inline)
    }

    fn apply_attribute(&mut self, node: &mut PatternNode, attr: &Attribute) -> Result<bool, EvalError> {
        let Some(&(_, takes_value)) = KNOWN_ATTRIBUTES.iter().find(|(name, _)| *name == attr.name)
        else {
            trace!(attribute = %attr.name, "ignoring unknown attribute");
            return Ok(false);
        };
        let value = match (&attr.value, takes_value) {
            (Some(value), true) => value.as_str(),
            (None, false) => "",
            (None, true) => {
                return Err(EvalError::new(format!(
                    "used attribute '{}' without providing a value",
                    attr.name
                )))
            }
            (Some(_), false) => {
                return Err(EvalError::new(format!(
                    "provided a value to attribute '{}' which doesn't take one",
                    attr.name
                )))
            }
        };

        match attr.name.as_str() {
            "color" => node.set_color(parse_color(value)?),
            "name" => node.display_name = Some(value.to_string()),
            "comment" => node.comment = Some(value.to_string()),
            "hidden" => node.hidden = true,
            "inline" => {
                if !node.is_compound() {
                    return Err(EvalError::new(
                        "inline attribute can only be applied to nested types",
                    ));
                }
                return Ok(true);
            }
            "format" => {
                self.single_param_function(value, "formatter")?;
                node.formatter = Some(value.to_string());
            }
            "transform" => {
                self.single_param_function(value, "transform")?;
                node.transform = Some(value.to_string());
            }
            "pointer_base" => {
                if !matches!(node.kind, PatternKind::Pointer { .. }) {
                    return Err(EvalError::new(
                        "pointer_base attribute may only be applied to a pointer",
                    ));
                }
                self.single_param_function(value, "pointer base")?;
            }
            _ => {}
        }
        Ok(false)
    }

    fn single_param_function(&self, name: &str, role: &str) -> Result<&'a FnDef, EvalError> {
        let def = self
            .function(name)
            .ok_or_else(|| EvalError::new(format!("cannot find {} function '{}'", role, name)))?;
        if def.params.len() != 1 {
            return Err(EvalError::new(format!(
                "{} function '{}' needs exactly one parameter",
                role, name
            )));
        }
        Ok(def)
    }

    /// Run the `pointer_base` function on the raw pointer value
    pub(crate) fn pointer_base(&mut self, attr: &Attribute, raw: u128) -> Result<u128, EvalError> {
        self.call_pointer_base(attr, raw)
            .map_err(|e| e.with_line_if_none(attr.span.line))
    }

    fn call_pointer_base(&mut self, attr: &Attribute, raw: u128) -> Result<u128, EvalError> {
        let name = attr
            .value
            .as_deref()
            .ok_or_else(|| EvalError::new("used attribute 'pointer_base' without providing a value"))?;
        let def = self.single_param_function(name, "pointer base")?;
        self.call_user(def, vec![Value::Unsigned(raw)])?
            .ok_or_else(|| EvalError::new(format!("function '{}' did not return a value", name)))?
            .to_unsigned()
    }

    /// The node's value after its transform function, if any
    pub fn transform_node(&mut self, node: &PatternNode) -> Result<Value, EvalError> {
        let value = self.node_value(node.clone())?;
        let Some(name) = &node.transform else {
            return Ok(value);
        };
        let def = self.single_param_function(name, "transform")?;
        self.call_user(def, vec![value])?
            .ok_or_else(|| EvalError::new(format!("function '{}' did not return a value", name)))
    }

    /// Display string for a node: the formatter's result (applied to the
    /// transformed value), the transformed value, or the default rendering
    pub fn format_node(&mut self, node: &PatternNode) -> Result<String, EvalError> {
        if let Some(name) = &node.formatter {
            let value = self.transform_node(node)?;
            let def = self.single_param_function(name, "formatter")?;
            let result = self.call_user(def, vec![value])?.ok_or_else(|| {
                EvalError::new(format!("function '{}' did not return a value", name))
            })?;
            return Ok(result.to_display_string());
        }
        if node.transform.is_some() {
            return Ok(self.transform_node(node)?.to_display_string());
        }
        node.formatted_value(self.data, self.default_endian())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;
    use data_source::SliceDataSource;

    fn program(source: &str) -> Program {
        let tokens = Lexer::new(source).tokenize().expect("lex failed");
        Parser::new(tokens).parse().expect("parse failed")
    }

    fn run(source: &str, data: &[u8]) -> Result<Vec<PatternNode>, EvalError> {
        let program = program(source);
        let ds = SliceDataSource::new(data);
        Evaluator::new(&program, &ds, EvalConfig::default()).evaluate()
    }

    #[test]
    fn test_parse_color() {
        assert_eq!(parse_color("FF0000").unwrap(), 0x0000FF);
        assert_eq!(parse_color("00FF00").unwrap(), 0x00FF00);
        assert_eq!(parse_color("11223344").unwrap(), 0x44332211);
        assert!(parse_color("FFF").is_err());
        assert!(parse_color("GG0000").is_err());
    }

    #[test]
    fn test_display_attributes() {
        let nodes = run(
            "u8 a [[color(\"FF0000\"), name(\"Alpha\"), comment(\"first\")]];\nu8 b [[hidden]];",
            &[1, 2],
        )
        .unwrap();
        assert_eq!(nodes[0].color, Some(0x0000FF));
        assert_eq!(nodes[0].display(), "Alpha");
        assert_eq!(nodes[0].comment.as_deref(), Some("first"));
        assert!(nodes[1].hidden);
    }

    #[test]
    fn test_array_color_propagates() {
        let nodes = run("u8 a[2] @ 0 [[color(\"00FF00\")]];", &[1, 2]).unwrap();
        assert!(nodes[0].children.iter().all(|c| c.color == Some(0x00FF00)));
    }

    #[test]
    fn test_attribute_arity() {
        let err = run("u8 a [[color]];", &[1]).unwrap_err();
        assert_eq!(err.message, "used attribute 'color' without providing a value");
        assert_eq!(err.line, Some(1));

        let err = run("u8 a [[hidden(\"yes\")]];", &[1]).unwrap_err();
        assert_eq!(
            err.message,
            "provided a value to attribute 'hidden' which doesn't take one"
        );
    }

    #[test]
    fn test_unknown_attribute_ignored() {
        let nodes = run("u8 a [[sealed]];", &[1]).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_inline() {
        let nodes = run(
            "struct H { u8 x; u8 y; };\nstruct S { H h [[inline]]; u8 z; };\nS s;",
            &[1, 2, 3],
        )
        .unwrap();
        let names: Vec<_> = nodes[0].children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["x", "y", "z"]);

        let err = run("u8 a [[inline]];", &[1]).unwrap_err();
        assert_eq!(err.message, "inline attribute can only be applied to nested types");
    }

    #[test]
    fn test_format_and_transform() {
        let source = "fn twice(u8 v) { return v * 2; };\n\
                      fn show(u8 v) { return std::format(\"v={}\", v); };\n\
                      u8 a [[transform(\"twice\"), format(\"show\")]];\n\
                      u8 b [[transform(\"twice\")]];";
        let program = program(source);
        let data = [5u8, 7];
        let ds = SliceDataSource::new(&data);
        let mut evaluator = Evaluator::new(&program, &ds, EvalConfig::default());
        let nodes = evaluator.evaluate().unwrap();
        assert_eq!(evaluator.format_node(&nodes[0]).unwrap(), "v=10");
        assert_eq!(evaluator.format_node(&nodes[1]).unwrap(), "14");
        assert_eq!(evaluator.transform_node(&nodes[1]).unwrap(), Value::Unsigned(14));
    }

    #[test]
    fn test_missing_formatter() {
        let err = run("u8 a [[format(\"nope\")]];", &[1]).unwrap_err();
        assert_eq!(err.message, "cannot find formatter function 'nope'");

        let err = run("fn two(u8 a, u8 b) { return a; };\nu8 a [[transform(\"two\")]];", &[1])
            .unwrap_err();
        assert_eq!(err.message, "transform function 'two' needs exactly one parameter");
        assert_eq!(err.line, Some(2));
    }

    #[test]
    fn test_pointer_base() {
        let source = "fn base(u128 p) { return 0x02; };\nu8 *p : u8 @ 0 [[pointer_base(\"base\")]];";
        let nodes = run(source, &[1, 0, 0, 0xAB]).unwrap();
        let PatternKind::Pointer { pointee: target } = &nodes[0].kind else {
            panic!("expected a resolved pointer");
        };
        assert_eq!(target.offset, 3);

        // a zero raw address is still adjusted by the base
        let nodes = run(source, &[0, 0, 0xAB]).unwrap();
        let PatternKind::Pointer { pointee: target } = &nodes[0].kind else {
            panic!("expected a resolved pointer");
        };
        assert_eq!(target.offset, 2);

        let err = run("fn base(u128 p) { return 0; };\nu8 a [[pointer_base(\"base\")]];", &[1])
            .unwrap_err();
        assert_eq!(err.message, "pointer_base attribute may only be applied to a pointer");
    }
}
