//! Text rendering of a pattern forest

use std::io::{self, Write};

use hexpat::{DataSource, PatternEngine, PatternKind, PatternNode, Program};
use tracing::warn;

use crate::config::OutputSettings;

pub struct TreePrinter<'a> {
    engine: &'a PatternEngine,
    program: &'a Program,
    data: &'a dyn DataSource,
    settings: &'a OutputSettings,
}

impl<'a> TreePrinter<'a> {
    pub fn new(
        engine: &'a PatternEngine,
        program: &'a Program,
        data: &'a dyn DataSource,
        settings: &'a OutputSettings,
    ) -> Self {
        Self {
            engine,
            program,
            data,
            settings,
        }
    }

    pub fn print(&self, nodes: &[PatternNode], out: &mut impl Write) -> io::Result<()> {
        for node in nodes {
            self.print_node(node, 0, out)?;
        }
        Ok(())
    }

    fn print_node(&self, node: &PatternNode, depth: usize, out: &mut impl Write) -> io::Result<()> {
        if node.hidden && !self.settings.show_hidden {
            return Ok(());
        }
        let indent = "  ".repeat(depth);
        write!(
            out,
            "{}{} : {} @ 0x{:X} [{}]",
            indent,
            node.display(),
            node.type_name,
            node.offset,
            node.size
        )?;
        if !matches!(node.kind, PatternKind::Padding) {
            // Formatter failures are shown inline rather than aborting the dump
            let value = match self.engine.format_value(self.program, node, self.data) {
                Ok(value) => value,
                Err(e) => {
                    warn!(node = %node.name, offset = node.offset, "failed to format value: {}", e);
                    format!("<{}>", e)
                }
            };
            write!(out, " = {}", value)?;
        }
        if let Some(comment) = &node.comment {
            write!(out, "  // {}", comment)?;
        }
        writeln!(out)?;

        let max_depth = self.settings.max_depth;
        if max_depth != 0 && depth + 1 >= max_depth {
            return Ok(());
        }
        if let PatternKind::Pointer { pointee: target } = &node.kind {
            return self.print_node(target, depth + 1, out);
        }

        let limit = match (node.kind == PatternKind::Array, self.settings.max_array_elements) {
            (true, n) if n > 0 => n,
            _ => usize::MAX,
        };
        for child in node.children.iter().take(limit) {
            self.print_node(child, depth + 1, out)?;
        }
        if node.children.len() > limit {
            writeln!(out, "{}  ... {} more", indent, node.children.len() - limit)?;
        }
        Ok(())
    }
}
