//! C++ / Arduino 草图事实提取 - 使用 tree-sitter-cpp

use super::{BuildConfig, ExtractionError, FactExtractor, Result};
use crate::model::{attr, EntityId, EntityKind, FactModel, ModelBuilder, RelationKind};
use crate::sources::{
    collect_sources, count_code_lines, is_header_file, is_sketch_file, resolve_include,
    scan_includes, IncludeDirective, IMPLICIT_SKETCH_HEADER,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use tree_sitter::{Node, Parser, Tree};

/// 计入圈复杂度的分支节点
const BRANCH_KINDS: &[&str] = &[
    "if_statement",
    "for_statement",
    "for_range_loop",
    "while_statement",
    "do_statement",
    "catch_clause",
    "conditional_expression",
];

/// C++ 草图提取器
#[derive(Debug, Default, Clone, Copy)]
pub struct CppExtractor;

impl CppExtractor {
    pub fn new() -> Self {
        Self
    }

    fn create_parser(path: &Path) -> Result<Parser> {
        let mut parser = Parser::new();
        let language = tree_sitter_cpp::language();
        parser
            .set_language(&language)
            .map_err(|e| ExtractionError::new(path, format!("failed to load C++ grammar: {e}")))?;
        Ok(parser)
    }
}

impl FactExtractor for CppExtractor {
    fn extract(&self, path: &Path, config: &BuildConfig) -> Result<FactModel> {
        let root = path.canonicalize().map_err(|e| ExtractionError::io(path, e))?;
        let mut parser = Self::create_parser(&root)?;

        tracing::info!("Extracting facts from {}", root.display());
        let files = parse_unit(&mut parser, &root, config)?;

        let mut collector = Collector::new(&files);
        for (index, file) in files.iter().enumerate() {
            collector.visit_decl(file.tree.root_node(), index, "", None);
        }
        let uses = collector.collect_uses();

        let unit_name = root
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "unit".to_string());

        let model = collector.emit(&root, &unit_name, &uses).map_err(|e| {
            ExtractionError::new(&root, format!("inconsistent fact model: {e}"))
        })?;

        tracing::info!(
            "Extracted {} entities, {} relations from {} files",
            model.entity_count(),
            model.relation_count(),
            files.len()
        );
        Ok(model)
    }
}

/// 已解析的源文件
struct ParsedFile {
    path: PathBuf,
    display: String,
    content: String,
    tree: Tree,
    /// (指令, 解析结果) - 未解析的视为外部库头文件
    includes: Vec<(IncludeDirective, Option<PathBuf>)>,
}

/// 解析源码单元: 根文件 + 可解析的传递 include
fn parse_unit(parser: &mut Parser, root: &Path, config: &BuildConfig) -> Result<Vec<ParsedFile>> {
    let base = if root.is_dir() { Some(root) } else { root.parent() };
    let mut queue: VecDeque<PathBuf> = collect_sources(root)?.into();
    let mut seen: HashSet<PathBuf> = queue.iter().cloned().collect();
    let mut files = Vec::new();

    while let Some(path) = queue.pop_front() {
        // 老草图常含 Latin-1 注释，按有损 UTF-8 解码 (与源码标识一致)
        let bytes = fs::read(&path).map_err(|e| ExtractionError::io(&path, e))?;
        let content = String::from_utf8_lossy(&bytes).into_owned();
        let tree = parser
            .parse(content.as_bytes(), None)
            .ok_or_else(|| ExtractionError::new(&path, "parser returned no tree"))?;

        if let Some(error) = first_error(tree.root_node()) {
            let pos = error.start_position();
            let reason = format!("syntax error at line {}, column {}", pos.row + 1, pos.column + 1);
            if config.lenient {
                tracing::warn!("{}: {}", path.display(), reason);
            } else {
                return Err(ExtractionError::new(&path, reason));
            }
        }

        let mut directives = scan_includes(&content);
        if is_sketch_file(&path) && !directives.iter().any(|d| d.target == IMPLICIT_SKETCH_HEADER) {
            directives.insert(
                0,
                IncludeDirective {
                    target: IMPLICIT_SKETCH_HEADER.to_string(),
                    system: true,
                },
            );
        }

        let mut includes = Vec::with_capacity(directives.len());
        for directive in directives {
            let resolved = resolve_include(&directive, &path, &config.include_paths);
            if let Some(found) = &resolved {
                if seen.insert(found.clone()) {
                    queue.push_back(found.clone());
                }
            }
            includes.push((directive, resolved));
        }

        let shown = base
            .and_then(|b| path.strip_prefix(b).ok())
            .map(|p| p.to_string_lossy().to_string())
            .or_else(|| path.file_name().map(|n| n.to_string_lossy().to_string()))
            .unwrap_or_default();

        tracing::debug!("Parsed {} ({} includes)", shown, includes.len());
        files.push(ParsedFile {
            path,
            display: shown,
            content,
            tree,
            includes,
        });
    }

    Ok(files)
}

fn first_error(node: Node) -> Option<Node> {
    if !node.has_error() {
        return None;
    }
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let found = node.children(&mut cursor).find_map(first_error);
    found.or(Some(node))
}

fn text<'a>(node: Node, content: &'a str) -> &'a str {
    &content[node.byte_range()]
}

fn extent(file: &ParsedFile, node: Node) -> String {
    format!(
        "{}:{}-{}",
        file.display,
        node.start_position().row + 1,
        node.end_position().row + 1
    )
}

/// 在声明符中查找函数声明符 (穿透指针/引用)
fn find_function_declarator(node: Node) -> Option<Node> {
    match node.kind() {
        "function_declarator" => Some(node),
        "pointer_declarator" | "reference_declarator" | "attributed_declarator" => {
            let mut cursor = node.walk();
            let found = node.named_children(&mut cursor).find_map(find_function_declarator);
            found
        }
        _ => None,
    }
}

/// 声明符中的名字节点
fn declarator_name(node: Node) -> Option<Node> {
    match node.kind() {
        "identifier" | "field_identifier" | "type_identifier" | "destructor_name"
        | "operator_name" | "qualified_identifier" => Some(node),
        "function_declarator" | "pointer_declarator" | "reference_declarator"
        | "array_declarator" | "init_declarator" | "attributed_declarator"
        | "parenthesized_declarator" => {
            if let Some(inner) = node.child_by_field_name("declarator") {
                return declarator_name(inner);
            }
            let mut cursor = node.walk();
            let found = node.named_children(&mut cursor).find_map(declarator_name);
            found
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VarRole {
    Global,
    Member,
    Enumerator,
}

impl VarRole {
    fn as_str(self) -> &'static str {
        match self {
            VarRole::Global => "global",
            VarRole::Member => "member",
            VarRole::Enumerator => "enumerator",
        }
    }
}

struct FunctionFacts {
    name: String,
    /// 所属类型 (类内定义或 Foo::bar 形式)
    owner: Option<String>,
    file: usize,
    extent: Option<String>,
    lines: Option<usize>,
    complexity: Option<usize>,
    params: Vec<String>,
    locals: Vec<String>,
}

struct TypeFacts {
    name: String,
    file: usize,
    extent: String,
    bases: Vec<String>,
    members: Vec<(String, VarRole)>,
}

struct NamedFacts {
    name: String,
    file: usize,
    extent: String,
}

/// 函数体中的使用关系目标
#[derive(Debug, Clone, PartialEq, Eq)]
enum UseTarget {
    Function(usize),
    Global(usize),
    Macro(usize),
    Type(usize),
    Member(usize, usize),
    External(String),
}

struct Collector<'a> {
    files: &'a [ParsedFile],
    functions: Vec<FunctionFacts>,
    function_index: HashMap<String, usize>,
    types: Vec<TypeFacts>,
    type_index: HashMap<String, usize>,
    globals: Vec<(NamedFacts, VarRole)>,
    global_index: HashMap<String, usize>,
    macros: Vec<NamedFacts>,
    macro_index: HashMap<String, usize>,
    bodies: Vec<(usize, usize, Node<'a>)>,
}

impl<'a> Collector<'a> {
    fn new(files: &'a [ParsedFile]) -> Self {
        Self {
            files,
            functions: Vec::new(),
            function_index: HashMap::new(),
            types: Vec::new(),
            type_index: HashMap::new(),
            globals: Vec::new(),
            global_index: HashMap::new(),
            macros: Vec::new(),
            macro_index: HashMap::new(),
            bodies: Vec::new(),
        }
    }

    fn content(&self, file: usize) -> &'a str {
        let files = self.files;
        &files[file].content
    }

    // ==================== 声明收集 ====================

    fn visit_decl(&mut self, node: Node<'a>, file: usize, scope: &str, owner: Option<&str>) {
        match node.kind() {
            "function_definition" => self.add_function_definition(node, file, scope, owner),
            "declaration" | "field_declaration" => self.add_declaration(node, file, scope, owner),
            "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier" => {
                self.add_type(node, file, scope, None);
            }
            "type_definition" => self.add_typedef(node, file, scope),
            "preproc_def" | "preproc_function_def" => self.add_macro(node, file),
            "namespace_definition" => {
                let name = node
                    .child_by_field_name("name")
                    .map(|n| text(n, self.content(file)).to_string());
                let inner_scope = match name {
                    Some(n) => format!("{scope}{n}::"),
                    None => scope.to_string(),
                };
                if let Some(body) = node.child_by_field_name("body") {
                    self.visit_children(body, file, &inner_scope, owner);
                }
            }
            "translation_unit" | "template_declaration" | "linkage_specification"
            | "declaration_list" | "field_declaration_list" | "preproc_if" | "preproc_ifdef"
            | "preproc_else" | "preproc_elif" | "preproc_elifdef" => {
                self.visit_children(node, file, scope, owner);
            }
            _ => {}
        }
    }

    fn visit_children(&mut self, node: Node<'a>, file: usize, scope: &str, owner: Option<&str>) {
        let mut cursor = node.walk();
        let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
        for child in children {
            self.visit_decl(child, file, scope, owner);
        }
    }

    fn add_macro(&mut self, node: Node<'a>, file: usize) {
        let Some(name) = node.child_by_field_name("name") else {
            return;
        };
        let name = text(name, self.content(file)).to_string();
        if self.macro_index.contains_key(&name) {
            return;
        }
        self.macro_index.insert(name.clone(), self.macros.len());
        self.macros.push(NamedFacts {
            name,
            file,
            extent: extent(&self.files[file], node),
        });
    }

    /// 注册或合并函数 (原型和定义按限定名合并)
    fn function_slot(&mut self, name: &str, owner: Option<String>, file: usize) -> usize {
        if let Some(&index) = self.function_index.get(name) {
            if self.functions[index].owner.is_none() {
                self.functions[index].owner = owner;
            }
            return index;
        }
        let index = self.functions.len();
        self.function_index.insert(name.to_string(), index);
        self.functions.push(FunctionFacts {
            name: name.to_string(),
            owner,
            file,
            extent: None,
            lines: None,
            complexity: None,
            params: Vec::new(),
            locals: Vec::new(),
        });
        index
    }

    /// 解析函数名: 返回 (限定名, 所属类型)
    fn qualify_function(&self, raw: &str, scope: &str, owner: Option<&str>) -> (String, Option<String>) {
        if let Some(owner) = owner {
            return (format!("{owner}::{raw}"), Some(owner.to_string()));
        }
        let qualified = format!("{scope}{raw}");
        let owner = qualified.rsplit_once("::").map(|(prefix, _)| prefix.to_string());
        (qualified, owner)
    }

    fn params_of(&self, func_decl: Node<'a>, file: usize) -> Vec<String> {
        let Some(list) = func_decl.child_by_field_name("parameters") else {
            return Vec::new();
        };
        let content = self.content(file);
        let mut cursor = list.walk();
        let params = list
            .named_children(&mut cursor)
            .filter(|p| matches!(p.kind(), "parameter_declaration" | "optional_parameter_declaration"))
            .filter_map(|p| p.child_by_field_name("declarator"))
            .filter_map(declarator_name)
            .map(|n| text(n, content).to_string())
            .collect();
        params
    }

    fn add_function_definition(&mut self, node: Node<'a>, file: usize, scope: &str, owner: Option<&str>) {
        let Some(func_decl) = node
            .child_by_field_name("declarator")
            .and_then(find_function_declarator)
        else {
            return;
        };
        let Some(name_node) = func_decl.child_by_field_name("declarator").and_then(declarator_name) else {
            return;
        };
        let raw = text(name_node, self.content(file));
        let (qualified, owner) = self.qualify_function(raw, scope, owner);

        let params = self.params_of(func_decl, file);
        let index = self.function_slot(&qualified, owner, file);
        let (complexity, locals) = match node.child_by_field_name("body") {
            Some(body) => {
                self.bodies.push((index, file, body));
                analyze_body(body, self.content(file))
            }
            None => (1, Vec::new()),
        };

        let lines = node.end_position().row - node.start_position().row + 1;
        let function = &mut self.functions[index];
        function.file = file;
        function.extent = Some(extent(&self.files[file], node));
        function.lines = Some(lines);
        function.complexity = Some(complexity);
        function.params = params;
        function.locals = locals;
    }

    fn add_declaration(&mut self, node: Node<'a>, file: usize, scope: &str, owner: Option<&str>) {
        if let Some(spec) = node.child_by_field_name("type") {
            if matches!(
                spec.kind(),
                "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier"
            ) {
                self.add_type(spec, file, scope, None);
            }
        }

        let content = self.content(file);
        let mut cursor = node.walk();
        let declarators: Vec<Node<'a>> = node.children_by_field_name("declarator", &mut cursor).collect();

        for declarator in declarators {
            if let Some(func_decl) = find_function_declarator(declarator) {
                // 函数原型
                let Some(name_node) = func_decl.child_by_field_name("declarator").and_then(declarator_name) else {
                    continue;
                };
                let (qualified, owner) = self.qualify_function(text(name_node, content), scope, owner);
                let params = self.params_of(func_decl, file);
                let index = self.function_slot(&qualified, owner, file);
                if self.functions[index].params.is_empty() {
                    self.functions[index].params = params;
                }
                continue;
            }

            let Some(name_node) = declarator_name(declarator) else {
                continue;
            };
            let name = text(name_node, content);
            match owner {
                Some(owner) => {
                    if let Some(&type_index) = self.type_index.get(owner) {
                        self.types[type_index].members.push((name.to_string(), VarRole::Member));
                    }
                }
                None => {
                    let qualified = format!("{scope}{name}");
                    if self.global_index.contains_key(&qualified) {
                        continue;
                    }
                    self.global_index.insert(qualified.clone(), self.globals.len());
                    self.globals.push((
                        NamedFacts {
                            name: qualified,
                            file,
                            extent: extent(&self.files[file], node),
                        },
                        VarRole::Global,
                    ));
                }
            }
        }
    }

    /// 注册带定义体的类型，返回类型下标
    fn add_type(&mut self, node: Node<'a>, file: usize, scope: &str, alias: Option<&str>) -> Option<usize> {
        let body = node.child_by_field_name("body")?;
        let content = self.content(file);
        let raw = node
            .child_by_field_name("name")
            .map(|n| text(n, content))
            .or(alias)?;
        let qualified = format!("{scope}{raw}");

        let index = match self.type_index.get(&qualified) {
            Some(&index) => index,
            None => {
                let index = self.types.len();
                self.type_index.insert(qualified.clone(), index);
                self.types.push(TypeFacts {
                    name: qualified.clone(),
                    file,
                    extent: extent(&self.files[file], node),
                    bases: Vec::new(),
                    members: Vec::new(),
                });
                index
            }
        };

        let mut cursor = node.walk();
        let clauses: Vec<Node<'a>> = node
            .named_children(&mut cursor)
            .filter(|c| c.kind() == "base_class_clause")
            .collect();
        for clause in clauses {
            let mut cursor = clause.walk();
            let bases: Vec<String> = clause
                .named_children(&mut cursor)
                .filter_map(|b| match b.kind() {
                    "type_identifier" | "qualified_identifier" => Some(text(b, content).to_string()),
                    "template_type" => b.child_by_field_name("name").map(|n| text(n, content).to_string()),
                    _ => None,
                })
                .collect();
            self.types[index].bases.extend(bases);
        }

        if node.kind() == "enum_specifier" {
            let mut cursor = body.walk();
            let enumerators: Vec<String> = body
                .named_children(&mut cursor)
                .filter(|e| e.kind() == "enumerator")
                .filter_map(|e| e.child_by_field_name("name"))
                .map(|n| text(n, content).to_string())
                .collect();
            self.types[index]
                .members
                .extend(enumerators.into_iter().map(|e| (e, VarRole::Enumerator)));
        } else {
            let member_scope = format!("{qualified}::");
            self.visit_children(body, file, &member_scope, Some(&qualified));
        }

        Some(index)
    }

    fn add_typedef(&mut self, node: Node<'a>, file: usize, scope: &str) {
        let content = self.content(file);
        let mut cursor = node.walk();
        let alias = node
            .children_by_field_name("declarator", &mut cursor)
            .find_map(declarator_name)
            .map(|n| text(n, content));

        // typedef struct { ... } Name;
        if let Some(spec) = node.child_by_field_name("type") {
            if matches!(
                spec.kind(),
                "class_specifier" | "struct_specifier" | "union_specifier" | "enum_specifier"
            ) && self.add_type(spec, file, scope, alias).is_some()
            {
                return;
            }
        }

        if let Some(alias) = alias {
            let qualified = format!("{scope}{alias}");
            if !self.type_index.contains_key(&qualified) {
                self.type_index.insert(qualified.clone(), self.types.len());
                self.types.push(TypeFacts {
                    name: qualified,
                    file,
                    extent: extent(&self.files[file], node),
                    bases: Vec::new(),
                    members: Vec::new(),
                });
            }
        }
    }

    // ==================== 使用关系 ====================

    fn collect_uses(&self) -> Vec<(usize, UseTarget, RelationKind)> {
        let mut uses = Vec::new();
        for &(function, file, body) in &self.bodies {
            self.visit_body(function, file, body, &mut uses);
        }
        uses
    }

    fn visit_body(
        &self,
        function: usize,
        file: usize,
        body: Node<'a>,
        uses: &mut Vec<(usize, UseTarget, RelationKind)>,
    ) {
        let content = self.content(file);
        let facts = &self.functions[function];
        let owner = facts.owner.as_deref();
        let shadowed: HashSet<&str> = facts
            .params
            .iter()
            .chain(facts.locals.iter())
            .map(String::as_str)
            .collect();

        let mut consumed = HashSet::new();
        let mut stack = vec![body];

        while let Some(node) = stack.pop() {
            // 已作为调用目标处理过的节点 (连同子节点) 跳过
            if consumed.contains(&node.id()) {
                continue;
            }
            match node.kind() {
                "call_expression" => {
                    if let Some(callee) = node.child_by_field_name("function") {
                        if let Some((target, kind)) =
                            self.resolve_call(callee, content, owner, &shadowed, &mut consumed)
                        {
                            uses.push((function, target, kind));
                        }
                    }
                }
                "identifier" => {
                    let name = text(node, content);
                    if !shadowed.contains(name) {
                        if let Some(target) = self.resolve_identifier(name, owner) {
                            uses.push((function, target, RelationKind::References));
                        }
                    }
                }
                "field_identifier" => {
                    // this->member
                    let through_this = node
                        .parent()
                        .and_then(|p| p.child_by_field_name("argument"))
                        .map(|a| a.kind() == "this")
                        .unwrap_or(false);
                    if through_this {
                        if let Some(target) = self.resolve_member(text(node, content), owner) {
                            uses.push((function, target, RelationKind::References));
                        }
                    }
                }
                "type_identifier" => {
                    if let Some(&index) = self.type_index.get(text(node, content)) {
                        uses.push((function, UseTarget::Type(index), RelationKind::References));
                    }
                }
                _ => {}
            }

            // 逆序压栈以保持文档顺序
            let mut cursor = node.walk();
            let children: Vec<Node<'a>> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
    }

    fn resolve_call(
        &self,
        callee: Node<'a>,
        content: &str,
        owner: Option<&str>,
        shadowed: &HashSet<&str>,
        consumed: &mut HashSet<usize>,
    ) -> Option<(UseTarget, RelationKind)> {
        match callee.kind() {
            "identifier" | "qualified_identifier" => {
                consumed.insert(callee.id());
                let name = text(callee, content);
                if shadowed.contains(name) {
                    return None;
                }
                if let Some(index) = self.resolve_function(name, owner) {
                    return Some((UseTarget::Function(index), RelationKind::Calls));
                }
                if let Some(&index) = self.macro_index.get(name) {
                    return Some((UseTarget::Macro(index), RelationKind::References));
                }
                Some((UseTarget::External(name.to_string()), RelationKind::Calls))
            }
            "template_function" => {
                let name = callee.child_by_field_name("name")?;
                self.resolve_call(name, content, owner, shadowed, consumed)
            }
            "field_expression" => {
                let field = callee.child_by_field_name("field")?;
                consumed.insert(field.id());
                let method = text(field, content);

                if let Some(index) = self.resolve_method(method, owner) {
                    return Some((UseTarget::Function(index), RelationKind::Calls));
                }

                // 库对象方法: 项目变量作为接收者时只保留方法名，避免引入自由标识符
                let receiver = callee.child_by_field_name("argument");
                let name = match receiver {
                    Some(arg) if arg.kind() == "identifier" => {
                        let object = text(arg, content);
                        let project_object = shadowed.contains(object)
                            || self.resolve_identifier(object, owner).is_some();
                        if project_object {
                            format!(".{method}")
                        } else {
                            consumed.insert(arg.id());
                            format!("{object}.{method}")
                        }
                    }
                    _ => format!(".{method}"),
                };
                Some((UseTarget::External(name), RelationKind::Calls))
            }
            _ => None,
        }
    }

    fn resolve_function(&self, name: &str, owner: Option<&str>) -> Option<usize> {
        if let Some(owner) = owner {
            if let Some(&index) = self.function_index.get(&format!("{owner}::{name}")) {
                return Some(index);
            }
        }
        if let Some(&index) = self.function_index.get(name) {
            return Some(index);
        }
        // 命名空间内的自由函数按短名字唯一匹配
        let mut candidates = self.functions.iter().enumerate().filter(|(_, f)| {
            !self.is_method(f) && f.name.rsplit("::").next() == Some(name)
        });
        match (candidates.next(), candidates.next()) {
            (Some((index, _)), None) => Some(index),
            _ => None,
        }
    }

    /// obj.method(): 优先当前类型，其次唯一同名方法
    fn resolve_method(&self, method: &str, owner: Option<&str>) -> Option<usize> {
        if let Some(owner) = owner {
            if let Some(&index) = self.function_index.get(&format!("{owner}::{method}")) {
                return Some(index);
            }
        }
        let mut candidates = self
            .functions
            .iter()
            .enumerate()
            .filter(|(_, f)| self.is_method(f) && f.name.rsplit("::").next() == Some(method));
        match (candidates.next(), candidates.next()) {
            (Some((index, _)), None) => Some(index),
            _ => None,
        }
    }

    fn is_method(&self, f: &FunctionFacts) -> bool {
        f.owner
            .as_deref()
            .map(|o| self.type_index.contains_key(o))
            .unwrap_or(false)
    }

    fn resolve_member(&self, name: &str, owner: Option<&str>) -> Option<UseTarget> {
        let type_index = *self.type_index.get(owner?)?;
        self.types[type_index]
            .members
            .iter()
            .position(|(member, _)| member == name)
            .map(|member| UseTarget::Member(type_index, member))
    }

    fn resolve_identifier(&self, name: &str, owner: Option<&str>) -> Option<UseTarget> {
        if let Some(member) = self.resolve_member(name, owner) {
            return Some(member);
        }
        if let Some(&index) = self.global_index.get(name) {
            return Some(UseTarget::Global(index));
        }
        if let Some(&index) = self.macro_index.get(name) {
            return Some(UseTarget::Macro(index));
        }
        // 非作用域枚举值
        for (type_index, facts) in self.types.iter().enumerate() {
            if let Some(member) = facts
                .members
                .iter()
                .position(|(m, role)| *role == VarRole::Enumerator && m == name)
            {
                return Some(UseTarget::Member(type_index, member));
            }
        }
        // 函数指针 (例如 attachInterrupt 的回调)
        self.resolve_function(name, owner).map(UseTarget::Function)
    }

    // ==================== 输出模型 ====================

    fn emit(
        &self,
        root: &Path,
        unit_name: &str,
        uses: &[(usize, UseTarget, RelationKind)],
    ) -> std::result::Result<FactModel, crate::model::ModelError> {
        let mut b = FactModel::builder();
        let mut externals: HashMap<(EntityKind, String), EntityId> = HashMap::new();

        let unit = b.add_entity(EntityKind::Unit, unit_name);
        b.set_attr(unit, attr::EXTENT, root.to_string_lossy().to_string());

        let file_ids: Vec<EntityId> = self
            .files
            .iter()
            .map(|file| {
                let id = b.add_entity(EntityKind::File, &file.display);
                let role = if is_sketch_file(&file.path) {
                    "sketch"
                } else if is_header_file(&file.path) {
                    "header"
                } else {
                    "source"
                };
                b.set_attr(id, attr::ROLE, role);
                b.set_attr(id, attr::LINES, count_code_lines(&file.content).to_string());
                b.set_attr(id, attr::EXTENT, file.path.to_string_lossy().to_string());
                id
            })
            .collect();

        let macro_ids: Vec<EntityId> = self
            .macros
            .iter()
            .map(|m| {
                let id = b.add_entity(EntityKind::Macro, &m.name);
                b.set_attr(id, attr::EXTENT, m.extent.clone());
                id
            })
            .collect();

        let mut type_ids = Vec::with_capacity(self.types.len());
        let mut member_ids = Vec::with_capacity(self.types.len());
        for facts in &self.types {
            let id = b.add_entity(EntityKind::Type, &facts.name);
            b.set_attr(id, attr::EXTENT, facts.extent.clone());
            let members: Vec<EntityId> = facts
                .members
                .iter()
                .map(|(name, role)| {
                    let member = b.add_entity(EntityKind::Variable, &format!("{}::{}", facts.name, name));
                    b.set_attr(member, attr::ROLE, role.as_str());
                    member
                })
                .collect();
            type_ids.push(id);
            member_ids.push(members);
        }

        let global_ids: Vec<EntityId> = self
            .globals
            .iter()
            .map(|(g, role)| {
                let id = b.add_entity(EntityKind::Variable, &g.name);
                b.set_attr(id, attr::ROLE, role.as_str());
                b.set_attr(id, attr::EXTENT, g.extent.clone());
                id
            })
            .collect();

        let mut function_ids = Vec::with_capacity(self.functions.len());
        let mut function_vars = Vec::with_capacity(self.functions.len());
        for f in &self.functions {
            let id = b.add_entity(EntityKind::Function, &f.name);
            if let Some(extent) = &f.extent {
                b.set_attr(id, attr::EXTENT, extent.clone());
            }
            if let Some(lines) = f.lines {
                b.set_attr(id, attr::LINES, lines.to_string());
            }
            if let Some(complexity) = f.complexity {
                b.set_attr(id, attr::COMPLEXITY, complexity.to_string());
            }
            let vars: Vec<EntityId> = f
                .params
                .iter()
                .map(|p| (p, "parameter"))
                .chain(f.locals.iter().map(|l| (l, "local")))
                .map(|(name, role)| {
                    let var = b.add_entity(EntityKind::Variable, &format!("{}::{}", f.name, name));
                    b.set_attr(var, attr::ROLE, role);
                    var
                })
                .collect();
            function_ids.push(id);
            function_vars.push(vars);
        }

        let mut external = |b: &mut ModelBuilder, kind: EntityKind, name: &str| -> EntityId {
            *externals.entry((kind, name.to_string())).or_insert_with(|| {
                let id = b.add_entity(kind, name);
                b.set_attr(id, attr::EXTERNAL, "true");
                id
            })
        };

        // 结构关系
        let file_by_path: HashMap<&Path, usize> = self
            .files
            .iter()
            .enumerate()
            .map(|(i, f)| (f.path.as_path(), i))
            .collect();
        for (index, file) in self.files.iter().enumerate() {
            b.add_relation(unit, file_ids[index], RelationKind::Contains);
            for (directive, resolved) in &file.includes {
                let target = match resolved.as_deref().and_then(|p| file_by_path.get(p)) {
                    Some(&i) => file_ids[i],
                    None => external(&mut b, EntityKind::File, &directive.target),
                };
                b.add_relation(file_ids[index], target, RelationKind::Includes);
            }
        }

        for (m, &id) in self.macros.iter().zip(&macro_ids) {
            b.add_relation(file_ids[m.file], id, RelationKind::Declares);
        }

        for (index, facts) in self.types.iter().enumerate() {
            b.add_relation(file_ids[facts.file], type_ids[index], RelationKind::Declares);
            for &member in &member_ids[index] {
                b.add_relation(type_ids[index], member, RelationKind::Contains);
            }
            for base in &facts.bases {
                let target = match self.type_index.get(base) {
                    Some(&i) => type_ids[i],
                    None => external(&mut b, EntityKind::Type, base),
                };
                b.add_relation(type_ids[index], target, RelationKind::Inherits);
            }
        }

        for ((g, _), &id) in self.globals.iter().zip(&global_ids) {
            b.add_relation(file_ids[g.file], id, RelationKind::Declares);
        }

        for (index, f) in self.functions.iter().enumerate() {
            match f.owner.as_deref().and_then(|o| self.type_index.get(o)) {
                Some(&t) => b.add_relation(type_ids[t], function_ids[index], RelationKind::Contains),
                None => b.add_relation(file_ids[f.file], function_ids[index], RelationKind::Declares),
            }
            for &var in &function_vars[index] {
                b.add_relation(function_ids[index], var, RelationKind::Declares);
            }
        }

        // 使用关系
        for (function, target, kind) in uses {
            let target_id = match target {
                UseTarget::Function(i) => function_ids[*i],
                UseTarget::Global(i) => global_ids[*i],
                UseTarget::Macro(i) => macro_ids[*i],
                UseTarget::Type(i) => type_ids[*i],
                UseTarget::Member(t, m) => member_ids[*t][*m],
                UseTarget::External(name) => external(&mut b, EntityKind::Function, name),
            };
            b.add_relation(function_ids[*function], target_id, *kind);
        }

        b.build()
    }
}

/// 计算函数体圈复杂度并收集局部变量
fn analyze_body(body: Node, content: &str) -> (usize, Vec<String>) {
    let mut complexity = 1;
    let mut locals = Vec::new();
    let mut stack = vec![body];

    while let Some(node) = stack.pop() {
        let kind = node.kind();
        if BRANCH_KINDS.contains(&kind) {
            complexity += 1;
        } else if kind == "case_statement" && node.child_by_field_name("value").is_some() {
            complexity += 1;
        } else if kind == "binary_expression" {
            let op = node
                .child_by_field_name("operator")
                .map(|o| text(o, content))
                .unwrap_or("");
            if matches!(op, "&&" | "||" | "and" | "or") {
                complexity += 1;
            }
        }

        if kind == "declaration" {
            let mut cursor = node.walk();
            for declarator in node.children_by_field_name("declarator", &mut cursor) {
                if find_function_declarator(declarator).is_some() {
                    continue;
                }
                if let Some(name) = declarator_name(declarator) {
                    locals.push(text(name, content).to_string());
                }
            }
        } else if kind == "for_range_loop" {
            if let Some(name) = node.child_by_field_name("declarator").and_then(declarator_name) {
                locals.push(text(name, content).to_string());
            }
        }

        // lambda 体不计入外层函数
        if kind == "lambda_expression" {
            continue;
        }
        let mut cursor = node.walk();
        stack.extend(node.named_children(&mut cursor));
    }

    locals.sort();
    locals.dedup();
    (complexity, locals)
}
