//! Pure symbol/import/call-site extraction.
//!
//! `extract` is a function of `(source, path, language)` only: no IO, no
//! store access. The embedded queries locate definition, import, and call
//! nodes; the finer detail (qualified names, parameters, heritage,
//! receivers, docstrings) is derived by walking the matched nodes, which
//! keeps the `.scm` patterns small and portable across grammar revisions.

use streaming_iterator::StreamingIterator;
use tree_sitter::Node;

use crate::indexer::parser::CodeParser;
use crate::models::{Language, ParameterRecord, SymbolRecord};

// ---------------------------------------------------------------------------
// Extraction output types
// ---------------------------------------------------------------------------

/// An import statement found in a file, with its declared target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRecord {
    pub source_file_path: String,
    pub import_statement: String,
    pub module_name: String,
    pub imported_names: Vec<String>,
    pub line_number: i64,
}

/// A textual invocation that may later resolve to a CALLS edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteRecord {
    pub callee_name: String,
    pub receiver_name: Option<String>,
    pub line_number: i64,
}

/// A declared supertype relation (EXTENDS or IMPLEMENTS) by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeritageRecord {
    pub subtype_qualified: String,
    pub supertype_name: String,
    pub relationship: &'static str,
    pub line_number: i64,
}

/// A non-fatal problem found while parsing or extracting one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionDiagnostic {
    pub stage: &'static str,
    pub category: &'static str,
    pub severity: &'static str,
    pub message: String,
    pub hint: &'static str,
}

/// Everything the extractor produces for one file.
#[derive(Debug, Clone, Default)]
pub struct FileExtraction {
    pub symbols: Vec<SymbolRecord>,
    pub imports: Vec<ImportRecord>,
    pub call_sites: Vec<CallSiteRecord>,
    pub heritage: Vec<HeritageRecord>,
    pub diagnostics: Vec<ExtractionDiagnostic>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert a repo-relative path to a dotted module name (extension
/// stripped). Used for Python and TypeScript qualified names.
pub fn to_module_name(path: &str) -> String {
    let without_ext = match path.rfind('.') {
        Some(pos) if !path[pos..].contains('/') => &path[..pos],
        _ => path,
    };
    without_ext
        .replace('\\', "/")
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join(".")
}

/// Underscore-prefix visibility convention (Python, TypeScript).
pub fn underscore_visibility(name: &str) -> &'static str {
    if name.starts_with('_') {
        "private"
    } else {
        "public"
    }
}

/// Go visibility: exported names start with an uppercase letter.
fn go_visibility(name: &str) -> &'static str {
    if name.starts_with(|c: char| c.is_ascii_uppercase()) {
        "public"
    } else {
        "private"
    }
}

fn node_text<'a>(node: Node<'_>, source: &'a str) -> &'a str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn line_of(node: Node<'_>) -> i64 {
    node.start_position().row as i64 + 1
}

fn end_line_of(node: Node<'_>) -> i64 {
    node.end_position().row as i64 + 1
}

/// First line of a definition, with block-opening punctuation trimmed.
fn signature_line(node: Node<'_>, source: &str) -> String {
    let text = node_text(node, source);
    let first = text.lines().next().unwrap_or("").trim();
    first
        .trim_end_matches('{')
        .trim_end_matches(':')
        .trim_end()
        .to_string()
}

fn last_dotted_component(value: &str) -> String {
    value
        .rsplit(['.', '/'])
        .next()
        .unwrap_or(value)
        .trim()
        .to_string()
}

/// Collect descendants of the given kinds, in document order.
fn collect_descendants<'t>(node: Node<'t>, kinds: &[&str], out: &mut Vec<Node<'t>>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if kinds.contains(&child.kind()) {
            out.push(child);
        } else {
            collect_descendants(child, kinds, out);
        }
    }
}

fn first_descendant_of_kind<'t>(node: Node<'t>, kinds: &[&str]) -> Option<Node<'t>> {
    let mut found = Vec::new();
    collect_descendants(node, kinds, &mut found);
    found.into_iter().next()
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

struct Extractor<'s> {
    source: &'s str,
    file_path: &'s str,
    language: Language,
    package_name: String,
    out: FileExtraction,
}

/// Extract symbols, imports, call sites, and heritage from source code.
///
/// Parse failures are file-local and non-fatal: the result carries an
/// empty symbol set plus a diagnostic, and the caller continues.
pub fn extract(source: &str, file_path: &str, language: Language) -> FileExtraction {
    let parser = CodeParser::new();
    let tree = match parser.parse(source, language, file_path) {
        Ok(tree) => tree,
        Err(e) => {
            return FileExtraction {
                diagnostics: vec![ExtractionDiagnostic {
                    stage: "parse",
                    category: "parser_unavailable",
                    severity: "error",
                    message: e.to_string(),
                    hint: "Check that the grammar for this language is compiled in.",
                }],
                ..Default::default()
            }
        }
    };

    let query = match CodeParser::load_query(language, file_path) {
        Ok(query) => query,
        Err(e) => {
            return FileExtraction {
                diagnostics: vec![ExtractionDiagnostic {
                    stage: "extract",
                    category: "extractor_failure",
                    severity: "error",
                    message: e.to_string(),
                    hint: "Embedded extraction query failed to compile.",
                }],
                ..Default::default()
            }
        }
    };

    let mut extractor = Extractor {
        source,
        file_path,
        language,
        package_name: String::new(),
        out: FileExtraction::default(),
    };

    if tree.root_node().has_error() {
        extractor.out.diagnostics.push(ExtractionDiagnostic {
            stage: "parse",
            severity: "warning",
            category: "syntax_error",
            message: format!("Syntax errors in {file_path}; extraction is best-effort."),
            hint: "Fix source syntax errors and rerun indexing.",
        });
    }

    let capture_names = query.capture_names();
    let mut cursor = tree_sitter::QueryCursor::new();
    let mut matches = cursor.matches(&query, tree.root_node(), source.as_bytes());
    while let Some(m) = matches.next() {
        let mut container: Option<(&str, Node<'_>)> = None;
        let mut name_node: Option<Node<'_>> = None;
        for capture in m.captures {
            let capture_name = capture_names[capture.index as usize];
            if capture_name == "name" {
                name_node = Some(capture.node);
            } else {
                container = Some((capture_name, capture.node));
            }
        }
        let Some((capture_name, node)) = container else {
            continue;
        };
        match capture_name {
            "package" => extractor.handle_package(node),
            "import" => extractor.handle_import(node),
            "reference.call" => extractor.handle_call(node),
            _ => {
                if let Some(kind) = capture_name.strip_prefix("definition.") {
                    extractor.handle_definition(node, name_node, kind);
                }
            }
        }
    }

    extractor.finish()
}

impl<'s> Extractor<'s> {
    fn finish(mut self) -> FileExtraction {
        // Identity-key dedup; repeated query bindings on the same node
        // (e.g. multi-name const specs share a container) stay distinct.
        let mut seen = std::collections::HashSet::new();
        self.out.symbols.retain(|s| {
            seen.insert((
                s.qualified_name.clone(),
                s.start_line,
                s.end_line,
                s.signature.clone(),
            ))
        });
        self.out
    }

    // -- package ---------------------------------------------------------

    fn handle_package(&mut self, node: Node<'_>) {
        let text = node_text(node, self.source);
        let cleaned = text
            .trim()
            .trim_start_matches("package")
            .trim()
            .trim_end_matches(';')
            .trim();
        if !cleaned.is_empty() {
            self.package_name = cleaned.to_string();
        }
    }

    // -- definitions -----------------------------------------------------

    fn handle_definition(&mut self, node: Node<'_>, name_node: Option<Node<'_>>, kind_hint: &str) {
        let Some(name_node) = name_node else { return };
        let name = node_text(name_node, self.source).to_string();
        if name.is_empty() {
            return;
        }

        // TypeScript constants share a pattern with arrow functions and
        // plain `let` declarations; filter both here.
        if kind_hint == "constant" && self.language == Language::TypeScript {
            let text = node_text(node, self.source);
            if !text.trim_start().starts_with("const") {
                return;
            }
            if let Some(declarator) = name_node.parent() {
                if let Some(value) = declarator.child_by_field_name("value") {
                    if matches!(value.kind(), "arrow_function" | "function_expression") {
                        return;
                    }
                }
            }
        }

        let ancestors = self.class_ancestors(node);
        let kind = self.effective_kind(node, kind_hint, &ancestors);
        let qualified_name = self.qualified_name(node, &name, &ancestors, &kind);
        let source_text = node_text(node, self.source);
        let trimmed = source_text.trim_start();

        let symbol = SymbolRecord {
            name: name.clone(),
            qualified_name: qualified_name.clone(),
            kind: kind.clone(),
            file_path: self.file_path.to_string(),
            start_line: line_of(node),
            end_line: end_line_of(node),
            signature: Some(signature_line(node, self.source)),
            return_type: self.return_type(node),
            visibility: Some(self.visibility(node, &name).to_string()),
            is_async: trimmed.starts_with("async"),
            is_static: self.is_static(node),
            parent_symbol_id: None,
            docstring: self.docstring(node),
            pagerank_score: 0.0,
            parameters: self.parameters(node),
        };
        self.out.symbols.push(symbol);

        if kind == "class" || kind == "interface" {
            self.collect_heritage(node, &qualified_name);
        }
    }

    /// Names of enclosing class-like ancestors, outermost first.
    fn class_ancestors(&self, node: Node<'_>) -> Vec<String> {
        let class_kinds: &[&str] = match self.language {
            Language::Python => &["class_definition"],
            Language::TypeScript => &["class_declaration"],
            Language::Java => &[
                "class_declaration",
                "interface_declaration",
                "enum_declaration",
            ],
            Language::Go => &[],
        };
        let mut names = Vec::new();
        let mut current = node.parent();
        while let Some(parent) = current {
            if class_kinds.contains(&parent.kind()) {
                if let Some(name_node) = parent.child_by_field_name("name") {
                    names.push(node_text(name_node, self.source).to_string());
                }
            }
            current = parent.parent();
        }
        names.reverse();
        names
    }

    /// A function nested directly under a class is a method; a function
    /// nested inside another function stays a function.
    fn effective_kind(&self, node: Node<'_>, kind_hint: &str, ancestors: &[String]) -> String {
        if kind_hint != "function" || ancestors.is_empty() {
            return kind_hint.to_string();
        }
        let class_kinds: &[&str] = match self.language {
            Language::Python => &["class_definition"],
            Language::TypeScript => &["class_declaration"],
            _ => return kind_hint.to_string(),
        };
        let function_kinds: &[&str] = match self.language {
            Language::Python => &["function_definition"],
            _ => &["function_declaration", "method_definition", "arrow_function"],
        };
        let mut current = node.parent();
        while let Some(parent) = current {
            if class_kinds.contains(&parent.kind()) {
                return "method".to_string();
            }
            if function_kinds.contains(&parent.kind()) {
                return "function".to_string();
            }
            current = parent.parent();
        }
        kind_hint.to_string()
    }

    fn qualified_name(
        &self,
        node: Node<'_>,
        name: &str,
        ancestors: &[String],
        kind: &str,
    ) -> String {
        match self.language {
            Language::Python | Language::TypeScript => {
                let module = to_module_name(self.file_path);
                let mut parts = vec![module];
                parts.extend(ancestors.iter().cloned());
                parts.push(name.to_string());
                parts.retain(|p| !p.is_empty());
                parts.join(".")
            }
            Language::Java => {
                let mut parts = Vec::new();
                if !self.package_name.is_empty() {
                    parts.push(self.package_name.clone());
                }
                parts.extend(ancestors.iter().cloned());
                parts.push(name.to_string());
                parts.join(".")
            }
            Language::Go => {
                let mut parts = Vec::new();
                if !self.package_name.is_empty() {
                    parts.push(self.package_name.clone());
                }
                if kind == "method" {
                    if let Some(receiver) = self.go_receiver_type(node) {
                        parts.push(receiver);
                    }
                }
                parts.push(name.to_string());
                parts.join(".")
            }
        }
    }

    fn go_receiver_type(&self, node: Node<'_>) -> Option<String> {
        let receiver = node.child_by_field_name("receiver")?;
        let text = node_text(receiver, self.source);
        let inner = text.trim().trim_start_matches('(').trim_end_matches(')');
        let last = inner.split_whitespace().last()?;
        let cleaned = last.trim_start_matches('*').trim();
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned.to_string())
        }
    }

    fn visibility(&self, node: Node<'_>, name: &str) -> &'static str {
        match self.language {
            Language::Python | Language::TypeScript => underscore_visibility(name),
            Language::Go => go_visibility(name),
            Language::Java => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    if child.kind() == "modifiers" {
                        let text = node_text(child, self.source);
                        if text.contains("public") {
                            return "public";
                        }
                        if text.contains("private") {
                            return "private";
                        }
                        if text.contains("protected") {
                            return "protected";
                        }
                    }
                }
                "package"
            }
        }
    }

    fn is_static(&self, node: Node<'_>) -> bool {
        match self.language {
            Language::Java => {
                let mut cursor = node.walk();
                let result = node.children(&mut cursor).any(|child| {
                    child.kind() == "modifiers" && node_text(child, self.source).contains("static")
                });
                result
            }
            Language::TypeScript => {
                let text = node_text(node, self.source);
                text.trim_start().starts_with("static")
            }
            _ => false,
        }
    }

    fn return_type(&self, node: Node<'_>) -> Option<String> {
        let field = match self.language {
            Language::Python | Language::TypeScript => "return_type",
            Language::Java => "type",
            Language::Go => "result",
        };
        let type_node = node.child_by_field_name(field)?;
        let text = node_text(type_node, self.source)
            .trim()
            .trim_start_matches(':')
            .trim()
            .trim_start_matches("->")
            .trim()
            .to_string();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }

    /// Python docstring: a leading string expression in the body.
    fn docstring(&self, node: Node<'_>) -> Option<String> {
        if self.language != Language::Python {
            return None;
        }
        let body = node.child_by_field_name("body")?;
        let first = body.named_child(0)?;
        if first.kind() != "expression_statement" {
            return None;
        }
        let inner = first.named_child(0)?;
        if inner.kind() != "string" {
            return None;
        }
        let raw = node_text(inner, self.source);
        let stripped = raw
            .trim()
            .trim_start_matches("\"\"\"")
            .trim_end_matches("\"\"\"")
            .trim_start_matches("'''")
            .trim_end_matches("'''")
            .trim_matches('"')
            .trim_matches('\'')
            .trim();
        if stripped.is_empty() {
            None
        } else {
            Some(stripped.to_string())
        }
    }

    fn parameters(&self, node: Node<'_>) -> Vec<ParameterRecord> {
        let params_node = match node.child_by_field_name("parameters") {
            Some(n) => n,
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        let mut cursor = params_node.walk();
        for child in params_node.named_children(&mut cursor) {
            if matches!(child.kind(), "comment") {
                continue;
            }
            let name_node = child
                .child_by_field_name("name")
                .or_else(|| child.child_by_field_name("pattern"))
                .or_else(|| {
                    if matches!(child.kind(), "identifier" | "field_identifier") {
                        Some(child)
                    } else {
                        first_descendant_of_kind(child, &["identifier"])
                    }
                });
            let Some(name_node) = name_node else { continue };
            let name = node_text(name_node, self.source).to_string();
            if name.is_empty() || name == "self" || name == "cls" || name == "this" {
                continue;
            }
            let type_ = child
                .child_by_field_name("type")
                .map(|t| node_text(t, self.source).trim().trim_start_matches(':').trim().to_string())
                .filter(|t| !t.is_empty());
            let default_value = child
                .child_by_field_name("value")
                .map(|v| node_text(v, self.source).trim().to_string())
                .filter(|v| !v.is_empty());
            out.push(ParameterRecord {
                name,
                position: out.len() as i64,
                type_,
                default_value,
            });
        }
        out
    }

    // -- heritage --------------------------------------------------------

    fn collect_heritage(&mut self, node: Node<'_>, subtype_qualified: &str) {
        let line = line_of(node);
        match self.language {
            Language::Python => {
                if let Some(superclasses) = node.child_by_field_name("superclasses") {
                    let mut cursor = superclasses.walk();
                    for child in superclasses.named_children(&mut cursor) {
                        if matches!(child.kind(), "keyword_argument" | "comment") {
                            continue;
                        }
                        let text = node_text(child, self.source).trim().to_string();
                        if text.is_empty() {
                            continue;
                        }
                        self.push_heritage(subtype_qualified, &text, "EXTENDS", line);
                    }
                }
            }
            Language::TypeScript => {
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    match child.kind() {
                        "class_heritage" => {
                            let mut inner = child.walk();
                            for clause in child.children(&mut inner) {
                                let relationship = match clause.kind() {
                                    "extends_clause" => "EXTENDS",
                                    "implements_clause" => "IMPLEMENTS",
                                    _ => continue,
                                };
                                self.push_type_names(clause, subtype_qualified, relationship, line);
                            }
                        }
                        // interface Foo extends Bar
                        kind if kind.contains("extends") => {
                            self.push_type_names(child, subtype_qualified, "EXTENDS", line);
                        }
                        _ => {}
                    }
                }
            }
            Language::Java => {
                if let Some(superclass) = node.child_by_field_name("superclass") {
                    self.push_type_names(superclass, subtype_qualified, "EXTENDS", line);
                }
                if let Some(interfaces) = node.child_by_field_name("interfaces") {
                    self.push_type_names(interfaces, subtype_qualified, "IMPLEMENTS", line);
                }
                let mut cursor = node.walk();
                for child in node.children(&mut cursor) {
                    if child.kind() == "extends_interfaces" {
                        self.push_type_names(child, subtype_qualified, "EXTENDS", line);
                    }
                }
            }
            Language::Go => {}
        }
    }

    fn push_type_names(
        &mut self,
        node: Node<'_>,
        subtype_qualified: &str,
        relationship: &'static str,
        line: i64,
    ) {
        let mut found = Vec::new();
        collect_descendants(node, &["type_identifier", "identifier"], &mut found);
        for type_node in found {
            let text = node_text(type_node, self.source).trim().to_string();
            if !text.is_empty() {
                self.push_heritage(subtype_qualified, &text, relationship, line);
            }
        }
    }

    fn push_heritage(
        &mut self,
        subtype_qualified: &str,
        raw_supertype: &str,
        relationship: &'static str,
        line: i64,
    ) {
        let supertype = last_dotted_component(raw_supertype.split('<').next().unwrap_or(""));
        if supertype.is_empty() || supertype == "object" {
            return;
        }
        self.out.heritage.push(HeritageRecord {
            subtype_qualified: subtype_qualified.to_string(),
            supertype_name: supertype,
            relationship,
            line_number: line,
        });
    }

    // -- imports ---------------------------------------------------------

    fn handle_import(&mut self, node: Node<'_>) {
        let statement = node_text(node, self.source)
            .lines()
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        let line = line_of(node);

        match (self.language, node.kind()) {
            (Language::Python, "import_statement") => {
                let mut cursor = node.walk();
                for child in node.named_children(&mut cursor) {
                    let module = match child.kind() {
                        "dotted_name" => node_text(child, self.source).to_string(),
                        "aliased_import" => child
                            .child_by_field_name("name")
                            .map(|n| node_text(n, self.source).to_string())
                            .unwrap_or_default(),
                        _ => continue,
                    };
                    if !module.is_empty() {
                        self.push_import(&statement, &module, Vec::new(), line);
                    }
                }
            }
            (Language::Python, "import_from_statement") => {
                let module = node
                    .child_by_field_name("module_name")
                    .map(|n| node_text(n, self.source).to_string())
                    .unwrap_or_default();
                let mut names = Vec::new();
                let mut cursor = node.walk();
                let mut past_module = false;
                for child in node.named_children(&mut cursor) {
                    if !past_module {
                        // The first dotted_name/relative_import is the module.
                        past_module = true;
                        continue;
                    }
                    match child.kind() {
                        "dotted_name" => names.push(node_text(child, self.source).to_string()),
                        "aliased_import" => {
                            if let Some(name) = child.child_by_field_name("name") {
                                names.push(node_text(name, self.source).to_string());
                            }
                        }
                        "wildcard_import" => names.push("*".to_string()),
                        _ => {}
                    }
                }
                if !module.is_empty() {
                    self.push_import(&statement, &module, names, line);
                }
            }
            (Language::TypeScript, _) => {
                let module = node
                    .child_by_field_name("source")
                    .map(|n| node_text(n, self.source).trim_matches(['"', '\'']).to_string())
                    .unwrap_or_default();
                if module.is_empty() {
                    return;
                }
                let mut names = Vec::new();
                let mut specifiers = Vec::new();
                collect_descendants(node, &["import_specifier"], &mut specifiers);
                for spec in specifiers {
                    if let Some(name) = spec.child_by_field_name("name") {
                        names.push(node_text(name, self.source).to_string());
                    }
                }
                self.push_import(&statement, &module, names, line);
            }
            (Language::Java, _) => {
                let cleaned = statement
                    .trim_start_matches("import")
                    .trim()
                    .trim_start_matches("static")
                    .trim()
                    .trim_end_matches(';')
                    .trim();
                if !cleaned.is_empty() {
                    self.push_import(&statement, cleaned, Vec::new(), line);
                }
            }
            (Language::Go, _) => {
                let module = node
                    .child_by_field_name("path")
                    .map(|n| node_text(n, self.source).trim_matches('"').to_string())
                    .unwrap_or_default();
                if !module.is_empty() {
                    self.push_import(&statement, &module, Vec::new(), line);
                }
            }
            _ => {}
        }
    }

    fn push_import(
        &mut self,
        statement: &str,
        module_name: &str,
        imported_names: Vec<String>,
        line: i64,
    ) {
        self.out.imports.push(ImportRecord {
            source_file_path: self.file_path.to_string(),
            import_statement: statement.to_string(),
            module_name: module_name.to_string(),
            imported_names,
            line_number: line,
        });
    }

    // -- call sites ------------------------------------------------------

    fn handle_call(&mut self, node: Node<'_>) {
        let (callee, receiver) = match self.language {
            Language::Java => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| node_text(n, self.source).to_string());
                let receiver = node
                    .child_by_field_name("object")
                    .filter(|o| o.kind() == "identifier")
                    .map(|o| node_text(o, self.source).to_string());
                (name, receiver)
            }
            _ => {
                let Some(function) = node.child_by_field_name("function") else {
                    return;
                };
                match function.kind() {
                    "identifier" => (Some(node_text(function, self.source).to_string()), None),
                    "attribute" | "member_expression" | "selector_expression" => {
                        let name_field = match function.kind() {
                            "attribute" => "attribute",
                            "member_expression" => "property",
                            _ => "field",
                        };
                        let object_field = match function.kind() {
                            "selector_expression" => "operand",
                            _ => "object",
                        };
                        let name = function
                            .child_by_field_name(name_field)
                            .map(|n| node_text(n, self.source).to_string());
                        let receiver = function
                            .child_by_field_name(object_field)
                            .filter(|o| o.kind() == "identifier")
                            .map(|o| node_text(o, self.source).to_string());
                        (name, receiver)
                    }
                    _ => (None, None),
                }
            }
        };
        let Some(callee_name) = callee else { return };
        if callee_name.is_empty() {
            return;
        }
        self.out.call_sites.push(CallSiteRecord {
            callee_name,
            receiver_name: receiver,
            line_number: line_of(node),
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn symbol<'a>(result: &'a FileExtraction, name: &str) -> &'a SymbolRecord {
        result
            .symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("symbol {name} not found in {:?}", result.symbols))
    }

    // -- helpers ---------------------------------------------------------

    #[test]
    fn to_module_name_strips_extension_and_joins() {
        assert_eq!(to_module_name("src/app/main.py"), "src.app.main");
        assert_eq!(to_module_name("a.ts"), "a");
        assert_eq!(to_module_name("pkg/util"), "pkg.util");
    }

    #[test]
    fn visibility_conventions() {
        assert_eq!(underscore_visibility("_helper"), "private");
        assert_eq!(underscore_visibility("main"), "public");
        assert_eq!(go_visibility("Exported"), "public");
        assert_eq!(go_visibility("internal"), "private");
    }

    // -- Python ----------------------------------------------------------

    #[test]
    fn python_functions_classes_and_methods() {
        let src = "\
import os
from collections import OrderedDict

def top(a, b=1):
    \"\"\"Adds things.\"\"\"
    return helper(a)

class Service:
    \"\"\"A service.\"\"\"

    def run(self, count: int):
        self.step()

    async def _poll(self):
        pass
";
        let result = extract(src, "pkg/svc.py", Language::Python);

        let top = symbol(&result, "top");
        assert_eq!(top.kind, "function");
        assert_eq!(top.qualified_name, "pkg.svc.top");
        assert_eq!(top.docstring.as_deref(), Some("Adds things."));
        assert_eq!(top.parameters.len(), 2);
        assert_eq!(top.parameters[1].default_value.as_deref(), Some("1"));
        assert_eq!(top.visibility.as_deref(), Some("public"));

        let class = symbol(&result, "Service");
        assert_eq!(class.kind, "class");
        assert_eq!(class.qualified_name, "pkg.svc.Service");
        assert_eq!(class.docstring.as_deref(), Some("A service."));

        let run = symbol(&result, "run");
        assert_eq!(run.kind, "method");
        assert_eq!(run.qualified_name, "pkg.svc.Service.run");
        assert_eq!(run.parameters.len(), 1);
        assert_eq!(run.parameters[0].name, "count");
        assert_eq!(run.parameters[0].type_.as_deref(), Some("int"));

        let poll = symbol(&result, "_poll");
        assert!(poll.is_async);
        assert_eq!(poll.visibility.as_deref(), Some("private"));

        assert_eq!(result.imports.len(), 2);
        assert_eq!(result.imports[0].module_name, "os");
        assert_eq!(result.imports[1].module_name, "collections");
        assert_eq!(result.imports[1].imported_names, vec!["OrderedDict"]);

        let callees: Vec<&str> = result
            .call_sites
            .iter()
            .map(|c| c.callee_name.as_str())
            .collect();
        assert!(callees.contains(&"helper"));
        assert!(callees.contains(&"step"));
        let step = result
            .call_sites
            .iter()
            .find(|c| c.callee_name == "step")
            .unwrap();
        assert_eq!(step.receiver_name.as_deref(), Some("self"));
    }

    #[test]
    fn python_heritage() {
        let src = "\
class Animal:
    pass

class Dog(Animal):
    pass
";
        let result = extract(src, "zoo.py", Language::Python);
        assert_eq!(result.heritage.len(), 1);
        let h = &result.heritage[0];
        assert_eq!(h.subtype_qualified, "zoo.Dog");
        assert_eq!(h.supertype_name, "Animal");
        assert_eq!(h.relationship, "EXTENDS");
    }

    #[test]
    fn python_relative_import() {
        let src = "from .sibling import thing\n";
        let result = extract(src, "pkg/mod.py", Language::Python);
        assert_eq!(result.imports.len(), 1);
        assert_eq!(result.imports[0].module_name, ".sibling");
        assert_eq!(result.imports[0].imported_names, vec!["thing"]);
    }

    #[test]
    fn python_parse_error_is_file_local() {
        let result = extract("def broken(:\n", "bad.py", Language::Python);
        assert!(result
            .diagnostics
            .iter()
            .any(|d| d.stage == "parse" && d.category == "syntax_error"));
    }

    #[test]
    fn python_line_ranges_and_containment() {
        let src = "\
class Box:
    def get(self):
        return 1
";
        let result = extract(src, "b.py", Language::Python);
        let class = symbol(&result, "Box");
        let method = symbol(&result, "get");
        assert!(class.start_line <= method.start_line);
        assert!(method.end_line <= class.end_line);
        assert!(method.start_line <= method.end_line);
    }

    // -- TypeScript ------------------------------------------------------

    #[test]
    fn typescript_functions_classes_constants() {
        let src = "\
import { login } from './auth';
import Router from './router';

export const MAX_RETRIES = 3;

export async function fetchData(url: string): Promise<Response> {
    return login(url);
}

export const add = (a: number, b: number): number => a + b;

export interface Config {
    host: string;
}

export class UserService {
    getUser(id: string): User {
        return this.lookup(id);
    }
}
";
        let result = extract(src, "src/api.ts", Language::TypeScript);

        let max = symbol(&result, "MAX_RETRIES");
        assert_eq!(max.kind, "constant");

        let fetch = symbol(&result, "fetchData");
        assert_eq!(fetch.kind, "function");
        assert!(fetch.is_async);
        assert_eq!(fetch.parameters.len(), 1);
        assert_eq!(fetch.parameters[0].type_.as_deref(), Some("string"));
        assert_eq!(fetch.return_type.as_deref(), Some("Promise<Response>"));

        let add = symbol(&result, "add");
        assert_eq!(add.kind, "function");
        // Arrow functions must not also be reported as constants.
        assert_eq!(
            result.symbols.iter().filter(|s| s.name == "add").count(),
            1
        );

        let config = symbol(&result, "Config");
        assert_eq!(config.kind, "interface");

        let get_user = symbol(&result, "getUser");
        assert_eq!(get_user.kind, "method");
        assert_eq!(get_user.qualified_name, "src.api.UserService.getUser");

        assert_eq!(result.imports.len(), 2);
        assert_eq!(result.imports[0].module_name, "./auth");
        assert_eq!(result.imports[0].imported_names, vec!["login"]);
        assert_eq!(result.imports[1].module_name, "./router");

        let lookup = result
            .call_sites
            .iter()
            .find(|c| c.callee_name == "lookup")
            .unwrap();
        assert_eq!(lookup.receiver_name, None); // receiver `this` is not an identifier node
    }

    #[test]
    fn typescript_heritage() {
        let src = "\
interface Flyer {}
class Base {}
class Bird extends Base implements Flyer {}
";
        let result = extract(src, "x.ts", Language::TypeScript);
        let extends: Vec<&HeritageRecord> = result
            .heritage
            .iter()
            .filter(|h| h.relationship == "EXTENDS")
            .collect();
        let implements: Vec<&HeritageRecord> = result
            .heritage
            .iter()
            .filter(|h| h.relationship == "IMPLEMENTS")
            .collect();
        assert_eq!(extends.len(), 1);
        assert_eq!(extends[0].supertype_name, "Base");
        assert_eq!(implements.len(), 1);
        assert_eq!(implements[0].supertype_name, "Flyer");
    }

    // -- Java ------------------------------------------------------------

    #[test]
    fn java_package_class_method() {
        let src = "\
package com.example.app;

import java.util.List;

public class Service extends Base implements Runnable {
    public static void doWork(int count) {
        helper(count);
    }

    private String helper(String name, int x) {
        return name;
    }
}
";
        let result = extract(src, "Service.java", Language::Java);

        let class = symbol(&result, "Service");
        assert_eq!(class.qualified_name, "com.example.app.Service");
        assert_eq!(class.kind, "class");

        let do_work = symbol(&result, "doWork");
        assert_eq!(do_work.kind, "method");
        assert_eq!(do_work.qualified_name, "com.example.app.Service.doWork");
        assert!(do_work.is_static);
        assert_eq!(do_work.visibility.as_deref(), Some("public"));
        assert_eq!(do_work.return_type.as_deref(), Some("void"));
        assert_eq!(do_work.parameters.len(), 1);
        assert_eq!(do_work.parameters[0].name, "count");
        assert_eq!(do_work.parameters[0].type_.as_deref(), Some("int"));

        let helper = symbol(&result, "helper");
        assert_eq!(helper.visibility.as_deref(), Some("private"));
        assert!(!helper.is_static);
        assert_eq!(helper.parameters.len(), 2);

        assert_eq!(result.imports.len(), 1);
        assert_eq!(result.imports[0].module_name, "java.util.List");

        let extends: Vec<&HeritageRecord> = result
            .heritage
            .iter()
            .filter(|h| h.relationship == "EXTENDS")
            .collect();
        assert_eq!(extends.len(), 1);
        assert_eq!(extends[0].supertype_name, "Base");
        assert!(result
            .heritage
            .iter()
            .any(|h| h.relationship == "IMPLEMENTS" && h.supertype_name == "Runnable"));

        assert!(result.call_sites.iter().any(|c| c.callee_name == "helper"));
    }

    #[test]
    fn java_wildcard_import() {
        let src = "import java.io.*;\nclass A {}\n";
        let result = extract(src, "A.java", Language::Java);
        assert_eq!(result.imports[0].module_name, "java.io.*");
    }

    // -- Go --------------------------------------------------------------

    #[test]
    fn go_functions_methods_types() {
        let src = "\
package http

import (
    \"fmt\"
    \"strings\"
)

const MaxConns = 8

type Server struct {
}

type Handler interface {
}

func New(addr string) *Server {
    return &Server{}
}

func (s *Server) ListenAndServe() error {
    fmt.Println(strings.ToUpper(\"up\"))
    return nil
}
";
        let result = extract(src, "server.go", Language::Go);

        let server = symbol(&result, "Server");
        assert_eq!(server.kind, "class");
        assert_eq!(server.qualified_name, "http.Server");

        let handler = symbol(&result, "Handler");
        assert_eq!(handler.kind, "interface");

        let max = symbol(&result, "MaxConns");
        assert_eq!(max.kind, "constant");
        assert_eq!(max.visibility.as_deref(), Some("public"));

        let new = symbol(&result, "New");
        assert_eq!(new.kind, "function");
        assert_eq!(new.qualified_name, "http.New");
        assert_eq!(new.return_type.as_deref(), Some("*Server"));
        assert_eq!(new.parameters.len(), 1);
        assert_eq!(new.parameters[0].name, "addr");
        assert_eq!(new.parameters[0].type_.as_deref(), Some("string"));

        let listen = symbol(&result, "ListenAndServe");
        assert_eq!(listen.kind, "method");
        assert_eq!(listen.qualified_name, "http.Server.ListenAndServe");
        assert_eq!(listen.visibility.as_deref(), Some("public"));

        assert_eq!(result.imports.len(), 2);
        assert_eq!(result.imports[0].module_name, "fmt");
        assert_eq!(result.imports[1].module_name, "strings");

        let println = result
            .call_sites
            .iter()
            .find(|c| c.callee_name == "Println")
            .unwrap();
        assert_eq!(println.receiver_name.as_deref(), Some("fmt"));
    }

    // -- generic ---------------------------------------------------------

    #[test]
    fn empty_source_yields_nothing() {
        for (lang, path) in [
            (Language::Python, "e.py"),
            (Language::TypeScript, "e.ts"),
            (Language::Java, "E.java"),
            (Language::Go, "e.go"),
        ] {
            let result = extract("", path, lang);
            assert!(result.symbols.is_empty(), "{lang}");
            assert!(result.imports.is_empty(), "{lang}");
            assert!(result.call_sites.is_empty(), "{lang}");
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let src = "def a():\n    b()\n\ndef b():\n    pass\n";
        let one = extract(src, "d.py", Language::Python);
        let two = extract(src, "d.py", Language::Python);
        assert_eq!(one.symbols, two.symbols);
        assert_eq!(one.call_sites, two.call_sites);
    }

    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn extract_never_panics_on_python(src in "\\PC{0,200}") {
            let _ = extract(&src, "fuzz.py", Language::Python);
        }

        #[test]
        fn extract_never_panics_on_go(src in "\\PC{0,200}") {
            let _ = extract(&src, "fuzz.go", Language::Go);
        }
    }
}
