//! Helpers over the tree-sitter Python grammar.
//!
//! Thin, pure functions: source text slicing, dotted-name flattening,
//! 1-based line spans, and docstring extraction.

use tree_sitter::Node;

/// Source text of a node.
pub fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

/// 1-based start line of a node.
pub fn start_line(node: Node<'_>) -> u32 {
    node.start_position().row as u32 + 1
}

/// 1-based inclusive end line of a node.
pub fn end_line(node: Node<'_>) -> u32 {
    let pos = node.end_position();
    let end = if pos.column == 0 {
        pos.row as u32
    } else {
        pos.row as u32 + 1
    };
    end.max(start_line(node))
}

/// Flatten an expression to a dotted name, best effort.
///
/// `a` → `a`; `a.b` → `a.b`; `a.b()` → `a.b`; `a[0].c` → `a.c`.
/// Returns `None` for expressions with no name-like head (literals,
/// lambdas, comprehensions).
pub fn dotted_name(node: Node<'_>, source: &str) -> Option<String> {
    match node.kind() {
        "identifier" => Some(node_text(node, source).to_string()),
        "attribute" => {
            let attr = node.child_by_field_name("attribute")?;
            let attr_text = node_text(attr, source);
            match node
                .child_by_field_name("object")
                .and_then(|obj| dotted_name(obj, source))
            {
                Some(left) => Some(format!("{left}.{attr_text}")),
                None => Some(attr_text.to_string()),
            }
        }
        "call" => dotted_name(node.child_by_field_name("function")?, source),
        "subscript" => dotted_name(node.child_by_field_name("value")?, source),
        "parenthesized_expression" => {
            let inner = node.named_child(0)?;
            dotted_name(inner, source)
        }
        _ => None,
    }
}

/// First named, non-comment child of a node.
fn first_statement(node: Node<'_>) -> Option<Node<'_>> {
    let mut cursor = node.walk();
    let found = node
        .named_children(&mut cursor)
        .find(|c| c.kind() != "comment");
    found
}

/// Extract the docstring of a module, class, or function body.
///
/// The docstring is the string literal of the body's first statement, with
/// quotes stripped and indentation cleaned the way Python's
/// `inspect.cleandoc` does.
pub fn docstring(body: Node<'_>, source: &str) -> Option<String> {
    let stmt = first_statement(body)?;
    if stmt.kind() != "expression_statement" {
        return None;
    }
    let expr = stmt.named_child(0)?;
    if expr.kind() != "string" {
        return None;
    }
    Some(cleandoc(&strip_string_quotes(node_text(expr, source))))
}

/// Strip an optional string prefix (`r`, `b`, `u`, `f`) and the surrounding
/// quotes from a Python string literal.
fn strip_string_quotes(literal: &str) -> String {
    let trimmed = literal.trim_start_matches(|c: char| "rRbBuUfF".contains(c));
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if trimmed.starts_with(quote) {
            let inner = &trimmed[quote.len()..];
            return inner.strip_suffix(quote).unwrap_or(inner).to_string();
        }
    }
    trimmed.to_string()
}

/// Clean a docstring: trim the first line, strip the common leading
/// indentation of the remaining lines, and drop surrounding blank lines.
fn cleandoc(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.is_empty() {
        return String::new();
    }

    let margin = lines[1..]
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned: Vec<String> = Vec::with_capacity(lines.len());
    cleaned.push(lines[0].trim_start().to_string());
    for line in &lines[1..] {
        if line.len() >= margin {
            cleaned.push(line[margin..].trim_end().to_string());
        } else {
            cleaned.push(line.trim_end().to_string());
        }
    }

    while cleaned.first().map(|l| l.is_empty()).unwrap_or(false) {
        cleaned.remove(0);
    }
    while cleaned.last().map(|l| l.is_empty()).unwrap_or(false) {
        cleaned.pop();
    }
    cleaned.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tree_sitter::Parser;

    fn parse(source: &str) -> tree_sitter::Tree {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .unwrap();
        parser.parse(source, None).unwrap()
    }

    fn first_call_name(source: &str) -> Option<String> {
        let tree = parse(source);
        let mut stack = vec![tree.root_node()];
        while let Some(node) = stack.pop() {
            if node.kind() == "call" {
                return dotted_name(node.child_by_field_name("function").unwrap(), source);
            }
            let mut cursor = node.walk();
            for child in node.named_children(&mut cursor) {
                stack.push(child);
            }
        }
        None
    }

    #[test]
    fn test_dotted_name_shapes() {
        assert_eq!(first_call_name("foo()\n").as_deref(), Some("foo"));
        assert_eq!(first_call_name("self.g()\n").as_deref(), Some("self.g"));
        assert_eq!(first_call_name("a.b.c()\n").as_deref(), Some("a.b.c"));
        // A chained constructor call collapses to its dotted path.
        assert_eq!(first_call_name("C().run()\n").as_deref(), Some("C.run"));
    }

    #[test]
    fn test_line_numbers_one_based() {
        let src = "x = 1\ndef foo():\n    pass\n";
        let tree = parse(src);
        let root = tree.root_node();
        let mut cursor = root.walk();
        let func = root
            .named_children(&mut cursor)
            .find(|c| c.kind() == "function_definition")
            .unwrap();
        assert_eq!(start_line(func), 2);
        assert_eq!(end_line(func), 3);
    }

    #[test]
    fn test_module_docstring() {
        let src = "\"\"\"Module doc.\n\nMore.\n\"\"\"\nx = 1\n";
        let tree = parse(src);
        let doc = docstring(tree.root_node(), src).unwrap();
        assert_eq!(doc, "Module doc.\n\nMore.");
    }

    #[test]
    fn test_function_docstring_cleaned() {
        let src = "def foo():\n    \"\"\"Does foo.\n\n    Indented body.\n    \"\"\"\n    pass\n";
        let tree = parse(src);
        let root = tree.root_node();
        let mut cursor = root.walk();
        let func = root
            .named_children(&mut cursor)
            .find(|c| c.kind() == "function_definition")
            .unwrap();
        let body = func.child_by_field_name("body").unwrap();
        let doc = docstring(body, src).unwrap();
        assert_eq!(doc, "Does foo.\n\nIndented body.");
    }

    #[test]
    fn test_no_docstring() {
        let src = "def foo():\n    return 1\n";
        let tree = parse(src);
        let root = tree.root_node();
        let mut cursor = root.walk();
        let func = root
            .named_children(&mut cursor)
            .find(|c| c.kind() == "function_definition")
            .unwrap();
        let body = func.child_by_field_name("body").unwrap();
        assert!(docstring(body, src).is_none());
    }

    #[test]
    fn test_strip_string_quotes() {
        assert_eq!(strip_string_quotes("\"abc\""), "abc");
        assert_eq!(strip_string_quotes("'''abc'''"), "abc");
        assert_eq!(strip_string_quotes("r\"raw\""), "raw");
    }
}
