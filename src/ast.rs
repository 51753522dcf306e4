//! AST provider.
//!
//! The resolution core consumes a parsed, symbol-bound AST through the
//! interface in this module. Nodes are addressed by [`AstId`]: the interned
//! symbol path of the enclosing symbol plus a post-order index within that
//! symbol. Symbol-defining nodes (modules, functions, composites, enums)
//! carry post-order −1 under their own path; everything else is numbered
//! left-to-right, children before parents, so that per-symbol resolution
//! results can live in a dense array.
//!
//! The `build` submodule lowers a value-level AST description into a
//! [`Program`]; it is how the front-end (and the test fixtures) hand the
//! core its input.

use crate::interner::{Atom, StringInterner};
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Stable handle into the AST.
///
/// `post_order` is −1 for the node that defines the symbol named by
/// `symbol`; contained expressions and declarations are numbered 0..n in
/// post order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AstId {
    pub symbol: Atom,
    pub post_order: i32,
}

impl Default for AstId {
    fn default() -> Self {
        AstId::NONE
    }
}

impl AstId {
    pub const NONE: AstId = AstId {
        symbol: Atom::NONE,
        post_order: -1,
    };

    pub fn new(symbol: Atom, post_order: i32) -> Self {
        AstId { symbol, post_order }
    }

    pub fn is_none(self) -> bool {
        self.symbol.is_none()
    }

    pub fn is_symbol_defining(self) -> bool {
        self.post_order < 0
    }
}

/// Tag of the construct a node represents, for dispatch without matching
/// the full payload.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum AstTag {
    Module,
    Record,
    Class,
    Union,
    Enum,
    Function,
    Formal,
    VarArgFormal,
    Variable,
    Forwarding,
    Call,
    OpCall,
    Tuple,
    Dot,
    New,
    Identifier,
    TypeQuery,
    Literal,
}

impl AstTag {
    pub fn is_symbol_defining(self) -> bool {
        matches!(
            self,
            AstTag::Module | AstTag::Record | AstTag::Class | AstTag::Union | AstTag::Enum | AstTag::Function
        )
    }

    pub fn is_aggregate_decl(self) -> bool {
        matches!(self, AstTag::Record | AstTag::Class | AstTag::Union)
    }

    pub fn is_type_decl(self) -> bool {
        self.is_aggregate_decl() || self == AstTag::Enum
    }
}

/// Declared storage class of a variable or field.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum VarStorage {
    Var,
    Const,
    Type,
    Param,
}

/// Declared intent of a formal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FormalIntent {
    Default,
    In,
    ConstIn,
    Out,
    Inout,
    Ref,
    ConstRef,
    Type,
    Param,
}

/// Procedure kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProcKind {
    Proc,
    Iter,
    Operator,
}

#[derive(Clone, Debug)]
pub struct ModuleDecl {
    pub name: Atom,
    pub stmts: Vec<AstId>,
    pub bundled: bool,
}

#[derive(Clone, Debug)]
pub struct AggregateDecl {
    pub name: Atom,
    /// Field and forwarding declarations, in declaration order.
    pub children: Vec<AstId>,
    /// Class inheritance expressions; empty for records and unions.
    pub inherit_exprs: Vec<AstId>,
}

#[derive(Clone, Debug)]
pub struct EnumDecl {
    pub name: Atom,
    pub elements: Vec<Atom>,
}

#[derive(Clone, Debug)]
pub struct FunctionDecl {
    pub name: Atom,
    pub kind: ProcKind,
    pub is_method: bool,
    pub is_parenless: bool,
    pub throws: bool,
    pub is_compiler_generated: bool,
    /// All formals in order; for a method the first is the `this` formal.
    pub formals: Vec<AstId>,
    pub where_clause: Option<AstId>,
    pub return_type: Option<AstId>,
    pub body: Vec<AstId>,
}

#[derive(Clone, Debug)]
pub struct VariableDecl {
    pub name: Atom,
    pub storage: VarStorage,
    pub type_expr: Option<AstId>,
    pub init_expr: Option<AstId>,
}

#[derive(Clone, Debug)]
pub struct FormalDecl {
    pub name: Atom,
    pub intent: FormalIntent,
    pub type_expr: Option<AstId>,
    pub init_expr: Option<AstId>,
    /// Count expression for varargs (`x: int ...n`); `None` means `...`.
    pub count_expr: Option<AstId>,
}

#[derive(Clone, Debug)]
pub struct CallExpr {
    /// Called expression; `AstId::NONE` for operator calls, which carry
    /// their name in `op_name`.
    pub callee: AstId,
    pub op_name: Atom,
    pub actuals: Vec<AstId>,
    /// Parallel to `actuals`; `Atom::NONE` for positional arguments.
    pub actual_names: Vec<Atom>,
    pub has_question_arg: bool,
}

#[derive(Clone, Debug)]
pub enum LiteralValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Real(f64),
    Imag(f64),
    String(Atom),
    Bytes(Atom),
    CString(Atom),
}

/// Node payload.
#[derive(Clone, Debug)]
pub enum AstKind {
    Module(ModuleDecl),
    Record(AggregateDecl),
    Class(AggregateDecl),
    Union(AggregateDecl),
    Enum(EnumDecl),
    Function(FunctionDecl),
    Formal(FormalDecl),
    VarArgFormal(FormalDecl),
    Variable(VariableDecl),
    /// `forwarding expr;` or `forwarding var f: T;` — the latter points at
    /// a `Variable` child.
    Forwarding { expr: AstId, expr_is_decl: bool },
    Call(CallExpr),
    OpCall(CallExpr),
    Tuple { elements: Vec<AstId> },
    Dot { receiver: AstId, field: Atom },
    New { type_expr: AstId },
    Identifier { name: Atom },
    TypeQuery { name: Atom },
    Literal(LiteralValue),
}

#[derive(Clone, Debug)]
pub struct AstNode {
    pub id: AstId,
    pub parent: AstId,
    /// Number of nodes contained in this node's subtree, excluding itself
    /// and excluding subtrees of nested symbols.
    pub contained: u32,
    pub kind: AstKind,
}

impl AstNode {
    pub fn tag(&self) -> AstTag {
        match &self.kind {
            AstKind::Module(_) => AstTag::Module,
            AstKind::Record(_) => AstTag::Record,
            AstKind::Class(_) => AstTag::Class,
            AstKind::Union(_) => AstTag::Union,
            AstKind::Enum(_) => AstTag::Enum,
            AstKind::Function(_) => AstTag::Function,
            AstKind::Formal(_) => AstTag::Formal,
            AstKind::VarArgFormal(_) => AstTag::VarArgFormal,
            AstKind::Variable(_) => AstTag::Variable,
            AstKind::Forwarding { .. } => AstTag::Forwarding,
            AstKind::Call(_) => AstTag::Call,
            AstKind::OpCall(_) => AstTag::OpCall,
            AstKind::Tuple { .. } => AstTag::Tuple,
            AstKind::Dot { .. } => AstTag::Dot,
            AstKind::New { .. } => AstTag::New,
            AstKind::Identifier { .. } => AstTag::Identifier,
            AstKind::TypeQuery { .. } => AstTag::TypeQuery,
            AstKind::Literal(_) => AstTag::Literal,
        }
    }

    pub fn as_aggregate(&self) -> Option<&AggregateDecl> {
        match &self.kind {
            AstKind::Record(d) | AstKind::Class(d) | AstKind::Union(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionDecl> {
        match &self.kind {
            AstKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_variable(&self) -> Option<&VariableDecl> {
        match &self.kind {
            AstKind::Variable(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_formal(&self) -> Option<&FormalDecl> {
        match &self.kind {
            AstKind::Formal(f) | AstKind::VarArgFormal(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&CallExpr> {
        match &self.kind {
            AstKind::Call(c) | AstKind::OpCall(c) => Some(c),
            _ => None,
        }
    }

    /// Name of the declaration, if this node declares one.
    pub fn decl_name(&self) -> Option<Atom> {
        match &self.kind {
            AstKind::Module(m) => Some(m.name),
            AstKind::Record(d) | AstKind::Class(d) | AstKind::Union(d) => Some(d.name),
            AstKind::Enum(e) => Some(e.name),
            AstKind::Function(f) => Some(f.name),
            AstKind::Formal(f) | AstKind::VarArgFormal(f) => Some(f.name),
            AstKind::Variable(v) => Some(v.name),
            _ => None,
        }
    }

    /// Expression children in traversal (post) order. Nested symbols are
    /// not expression children.
    pub fn expr_children(&self) -> Vec<AstId> {
        match &self.kind {
            AstKind::Module(_)
            | AstKind::Record(_)
            | AstKind::Class(_)
            | AstKind::Union(_)
            | AstKind::Enum(_)
            | AstKind::Function(_) => Vec::new(),
            AstKind::Formal(f) | AstKind::VarArgFormal(f) => {
                let mut v = Vec::new();
                v.extend(f.type_expr);
                v.extend(f.init_expr);
                v.extend(f.count_expr);
                v
            }
            AstKind::Variable(v) => {
                let mut out = Vec::new();
                out.extend(v.type_expr);
                out.extend(v.init_expr);
                out
            }
            AstKind::Forwarding { expr, .. } => vec![*expr],
            AstKind::Call(c) | AstKind::OpCall(c) => {
                let mut v = Vec::new();
                if !c.callee.is_none() {
                    v.push(c.callee);
                }
                v.extend(c.actuals.iter().copied());
                v
            }
            AstKind::Tuple { elements } => elements.clone(),
            AstKind::Dot { receiver, .. } => vec![*receiver],
            AstKind::New { type_expr } => vec![*type_expr],
            AstKind::Identifier { .. } | AstKind::TypeQuery { .. } | AstKind::Literal(_) => Vec::new(),
        }
    }
}

/// The whole symbol-bound AST for a compilation.
pub struct Program {
    nodes: FxHashMap<AstId, AstNode>,
    top_modules: Vec<AstId>,
}

impl Program {
    pub fn new() -> Self {
        Program {
            nodes: FxHashMap::default(),
            top_modules: Vec::new(),
        }
    }

    pub fn top_modules(&self) -> &[AstId] {
        &self.top_modules
    }

    pub fn node_ids(&self) -> impl Iterator<Item = AstId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn id_to_ast(&self, id: AstId) -> Option<&AstNode> {
        self.nodes.get(&id)
    }

    pub fn id_to_tag(&self, id: AstId) -> Option<AstTag> {
        self.nodes.get(&id).map(|n| n.tag())
    }

    pub fn id_to_parent_id(&self, id: AstId) -> Option<AstId> {
        let parent = self.nodes.get(&id)?.parent;
        if parent.is_none() { None } else { Some(parent) }
    }

    pub fn parent_ast(&self, node: &AstNode) -> Option<&AstNode> {
        if node.parent.is_none() {
            None
        } else {
            self.nodes.get(&node.parent)
        }
    }

    /// Does the aggregate declaration contain any `forwarding` clauses?
    pub fn aggregate_uses_forwarding(&self, id: AstId) -> bool {
        let Some(node) = self.id_to_ast(id) else {
            return false;
        };
        let Some(decl) = node.as_aggregate() else {
            return false;
        };
        decl.children
            .iter()
            .any(|c| self.id_to_tag(*c) == Some(AstTag::Forwarding))
    }

    pub fn id_is_parenless_function(&self, id: AstId) -> bool {
        match self.id_to_ast(id) {
            Some(node) => node.as_function().is_some_and(|f| f.is_parenless),
            None => false,
        }
    }

    /// Is the declaration a field, i.e. a variable declared directly inside
    /// an aggregate (possibly through a forwarding declaration)?
    pub fn id_is_field(&self, id: AstId) -> bool {
        let Some(node) = self.id_to_ast(id) else {
            return false;
        };
        if node.tag() != AstTag::Variable {
            return false;
        }
        let mut parent = self.parent_ast(node);
        while let Some(p) = parent {
            match p.tag() {
                AstTag::Record | AstTag::Class | AstTag::Union => return true,
                AstTag::Forwarding => parent = self.parent_ast(p),
                _ => return false,
            }
        }
        false
    }

    /// Does the aggregate with the given id declare a field with `name`?
    /// Does not consider superclass fields.
    pub fn id_contains_field_with_name(&self, id: AstId, name: Atom) -> bool {
        let Some(node) = self.id_to_ast(id) else {
            return false;
        };
        let Some(decl) = node.as_aggregate() else {
            return false;
        };
        for &child in &decl.children {
            if let Some(child_node) = self.id_to_ast(child) {
                match &child_node.kind {
                    AstKind::Variable(v) if v.name == name => return true,
                    AstKind::Forwarding { expr, expr_is_decl: true } => {
                        if let Some(fwd_var) = self.id_to_ast(*expr).and_then(|n| n.as_variable()) {
                            if fwd_var.name == name {
                                return true;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
        false
    }

    pub fn id_is_in_bundled_module(&self, id: AstId) -> bool {
        let mut cur = self.id_to_ast(id);
        while let Some(node) = cur {
            if let AstKind::Module(m) = &node.kind {
                return m.bundled;
            }
            cur = self.parent_ast(node);
        }
        false
    }

    fn insert(&mut self, node: AstNode) {
        self.nodes.insert(node.id, node);
    }
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

pub mod build {
    //! Value-level AST construction.
    //!
    //! Describes declarations and expressions as plain trees, then lowers
    //! them into a [`Program`] with post-order ids assigned per symbol.

    use super::*;

    #[derive(Clone, Debug)]
    pub enum Expr {
        Ident(String),
        TypeQuery(String),
        Bool(bool),
        Int(i64),
        Uint(u64),
        Real(f64),
        Imag(f64),
        Str(String),
        Call {
            callee: Box<Expr>,
            actuals: Vec<Actual>,
            has_question_arg: bool,
        },
        Op {
            name: String,
            actuals: Vec<Expr>,
        },
        Dot {
            receiver: Box<Expr>,
            field: String,
        },
        New(Box<Expr>),
        Tuple(Vec<Expr>),
    }

    #[derive(Clone, Debug)]
    pub struct Actual {
        pub expr: Expr,
        pub name: Option<String>,
    }

    impl Actual {
        pub fn positional(expr: Expr) -> Self {
            Actual { expr, name: None }
        }

        pub fn named(name: &str, expr: Expr) -> Self {
            Actual {
                expr,
                name: Some(name.to_string()),
            }
        }
    }

    /// Convenience constructors used heavily by tests.
    pub fn ident(name: &str) -> Expr {
        Expr::Ident(name.to_string())
    }

    pub fn type_query(name: &str) -> Expr {
        Expr::TypeQuery(name.to_string())
    }

    pub fn int(v: i64) -> Expr {
        Expr::Int(v)
    }

    pub fn call(callee: Expr, actuals: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: Box::new(callee),
            actuals: actuals.into_iter().map(Actual::positional).collect(),
            has_question_arg: false,
        }
    }

    pub fn call_q(callee: Expr) -> Expr {
        Expr::Call {
            callee: Box::new(callee),
            actuals: Vec::new(),
            has_question_arg: true,
        }
    }

    pub fn dot(receiver: Expr, field: &str) -> Expr {
        Expr::Dot {
            receiver: Box::new(receiver),
            field: field.to_string(),
        }
    }

    pub fn op(name: &str, actuals: Vec<Expr>) -> Expr {
        Expr::Op {
            name: name.to_string(),
            actuals,
        }
    }

    #[derive(Clone, Debug)]
    pub struct FormalSpec {
        pub name: String,
        pub intent: FormalIntent,
        pub type_expr: Option<Expr>,
        pub init_expr: Option<Expr>,
        pub is_vararg: bool,
        pub count_expr: Option<Expr>,
    }

    impl FormalSpec {
        pub fn new(name: &str, intent: FormalIntent, type_expr: Option<Expr>) -> Self {
            FormalSpec {
                name: name.to_string(),
                intent,
                type_expr,
                init_expr: None,
                is_vararg: false,
                count_expr: None,
            }
        }

        pub fn with_default(mut self, init: Expr) -> Self {
            self.init_expr = Some(init);
            self
        }

        pub fn vararg(mut self) -> Self {
            self.is_vararg = true;
            self
        }

        pub fn vararg_count(mut self, count: Expr) -> Self {
            self.is_vararg = true;
            self.count_expr = Some(count);
            self
        }
    }

    #[derive(Clone, Debug)]
    pub enum Decl {
        Var {
            name: String,
            storage: VarStorage,
            type_expr: Option<Expr>,
            init_expr: Option<Expr>,
        },
        Record {
            name: String,
            children: Vec<Decl>,
        },
        Class {
            name: String,
            inherits: Vec<Expr>,
            children: Vec<Decl>,
        },
        Union {
            name: String,
            children: Vec<Decl>,
        },
        Enum {
            name: String,
            elements: Vec<String>,
        },
        Forwarding {
            expr: Expr,
        },
        ForwardingField {
            name: String,
            storage: VarStorage,
            type_expr: Option<Expr>,
            init_expr: Option<Expr>,
        },
        Fn(FnSpec),
    }

    #[derive(Clone, Debug)]
    pub struct FnSpec {
        pub name: String,
        pub kind: ProcKind,
        pub is_method: bool,
        pub is_parenless: bool,
        pub throws: bool,
        pub receiver: Option<Expr>,
        pub receiver_intent: FormalIntent,
        pub formals: Vec<FormalSpec>,
        pub where_clause: Option<Expr>,
        pub return_type: Option<Expr>,
        pub body: Vec<Expr>,
    }

    impl FnSpec {
        pub fn proc(name: &str) -> Self {
            FnSpec {
                name: name.to_string(),
                kind: ProcKind::Proc,
                is_method: false,
                is_parenless: false,
                throws: false,
                receiver: None,
                receiver_intent: FormalIntent::Default,
                formals: Vec::new(),
                where_clause: None,
                return_type: None,
                body: Vec::new(),
            }
        }

        pub fn method(name: &str, receiver: Expr) -> Self {
            let mut spec = Self::proc(name);
            spec.is_method = true;
            spec.receiver = Some(receiver);
            spec
        }

        /// A method on the type itself (`this` has type intent).
        pub fn type_method(name: &str, receiver: Expr) -> Self {
            let mut spec = Self::method(name, receiver);
            spec.receiver_intent = FormalIntent::Type;
            spec
        }

        pub fn parenless(mut self) -> Self {
            self.is_parenless = true;
            self
        }

        pub fn formal(mut self, f: FormalSpec) -> Self {
            self.formals.push(f);
            self
        }

        pub fn where_(mut self, e: Expr) -> Self {
            self.where_clause = Some(e);
            self
        }

        pub fn returns(mut self, e: Expr) -> Self {
            self.return_type = Some(e);
            self
        }

        pub fn body_stmt(mut self, e: Expr) -> Self {
            self.body.push(e);
            self
        }
    }

    pub fn var(name: &str, type_expr: Option<Expr>, init_expr: Option<Expr>) -> Decl {
        Decl::Var {
            name: name.to_string(),
            storage: VarStorage::Var,
            type_expr,
            init_expr,
        }
    }

    pub fn type_var(name: &str, init_expr: Expr) -> Decl {
        Decl::Var {
            name: name.to_string(),
            storage: VarStorage::Type,
            type_expr: None,
            init_expr: Some(init_expr),
        }
    }

    pub fn param_var(name: &str, type_expr: Option<Expr>, init_expr: Option<Expr>) -> Decl {
        Decl::Var {
            name: name.to_string(),
            storage: VarStorage::Param,
            type_expr,
            init_expr,
        }
    }

    /// Lowers one module's declarations into `program`, assigning ids.
    pub struct Lowering<'a> {
        strings: &'a StringInterner,
        program: &'a mut Program,
    }

    struct SymbolNumbering {
        symbol: Atom,
        next: i32,
    }

    impl SymbolNumbering {
        fn alloc(&mut self) -> AstId {
            let id = AstId::new(self.symbol, self.next);
            self.next += 1;
            id
        }
    }

    impl<'a> Lowering<'a> {
        pub fn new(strings: &'a StringInterner, program: &'a mut Program) -> Self {
            Lowering { strings, program }
        }

        pub fn module(&mut self, name: &str, decls: Vec<Decl>) -> AstId {
            self.module_impl(name, decls, false)
        }

        pub fn bundled_module(&mut self, name: &str, decls: Vec<Decl>) -> AstId {
            self.module_impl(name, decls, true)
        }

        fn module_impl(&mut self, name: &str, decls: Vec<Decl>, bundled: bool) -> AstId {
            let name_atom = self.strings.intern(name);
            let path = self.strings.intern(name);
            let module_id = AstId::new(path, -1);
            let mut numbering = SymbolNumbering { symbol: path, next: 0 };

            let mut stmts = Vec::new();
            for decl in decls {
                stmts.push(self.lower_decl(decl, module_id, path, &mut numbering));
            }

            let contained = numbering.next as u32;
            self.program.insert(AstNode {
                id: module_id,
                parent: AstId::NONE,
                contained,
                kind: AstKind::Module(ModuleDecl {
                    name: name_atom,
                    stmts,
                    bundled,
                }),
            });
            self.program.top_modules.push(module_id);
            module_id
        }

        /// Symbol paths are unique: overloads of the same name get a
        /// repetition suffix.
        fn symbol_path(&self, parent_path: Atom, name: &str) -> Atom {
            let parent = self.strings.resolve(parent_path);
            let base = format!("{parent}.{name}");
            let mut path = self.strings.intern(&base);
            let mut repeat = 1;
            while self.program.nodes.contains_key(&AstId::new(path, -1)) {
                path = self.strings.intern(&format!("{base}#{repeat}"));
                repeat += 1;
            }
            path
        }

        fn lower_decl(
            &mut self,
            decl: Decl,
            parent: AstId,
            parent_path: Atom,
            numbering: &mut SymbolNumbering,
        ) -> AstId {
            match decl {
                Decl::Var {
                    name,
                    storage,
                    type_expr,
                    init_expr,
                } => self.lower_var(&name, storage, type_expr, init_expr, parent, numbering),
                Decl::Forwarding { expr } => {
                    let expr_id = self.lower_expr(expr, numbering);
                    let id = numbering.alloc();
                    self.reparent(expr_id, id);
                    self.program.insert(AstNode {
                        id,
                        parent,
                        contained: self.subtree_size(expr_id) + 1,
                        kind: AstKind::Forwarding {
                            expr: expr_id,
                            expr_is_decl: false,
                        },
                    });
                    id
                }
                Decl::ForwardingField {
                    name,
                    storage,
                    type_expr,
                    init_expr,
                } => {
                    let var_id =
                        self.lower_var(&name, storage, type_expr, init_expr, AstId::NONE, numbering);
                    let id = numbering.alloc();
                    self.reparent(var_id, id);
                    self.program.insert(AstNode {
                        id,
                        parent,
                        contained: self.subtree_size(var_id) + 1,
                        kind: AstKind::Forwarding {
                            expr: var_id,
                            expr_is_decl: true,
                        },
                    });
                    id
                }
                Decl::Record { name, children } => {
                    self.lower_aggregate(AstTag::Record, &name, Vec::new(), children, parent, parent_path)
                }
                Decl::Class {
                    name,
                    inherits,
                    children,
                } => self.lower_aggregate(AstTag::Class, &name, inherits, children, parent, parent_path),
                Decl::Union { name, children } => {
                    self.lower_aggregate(AstTag::Union, &name, Vec::new(), children, parent, parent_path)
                }
                Decl::Enum { name, elements } => {
                    let path = self.symbol_path(parent_path, &name);
                    let id = AstId::new(path, -1);
                    let name_atom = self.strings.intern(&name);
                    let elements = elements.iter().map(|e| self.strings.intern(e)).collect();
                    self.program.insert(AstNode {
                        id,
                        parent,
                        contained: 0,
                        kind: AstKind::Enum(EnumDecl {
                            name: name_atom,
                            elements,
                        }),
                    });
                    id
                }
                Decl::Fn(spec) => self.lower_fn(spec, parent, parent_path),
            }
        }

        fn lower_var(
            &mut self,
            name: &str,
            storage: VarStorage,
            type_expr: Option<Expr>,
            init_expr: Option<Expr>,
            parent: AstId,
            numbering: &mut SymbolNumbering,
        ) -> AstId {
            let type_id = type_expr.map(|e| self.lower_expr(e, numbering));
            let init_id = init_expr.map(|e| self.lower_expr(e, numbering));
            let id = numbering.alloc();
            let mut contained = 0;
            for child in [type_id, init_id].into_iter().flatten() {
                self.reparent(child, id);
                contained += self.subtree_size(child) + 1;
            }
            self.program.insert(AstNode {
                id,
                parent,
                contained,
                kind: AstKind::Variable(VariableDecl {
                    name: self.strings.intern(name),
                    storage,
                    type_expr: type_id,
                    init_expr: init_id,
                }),
            });
            id
        }

        fn lower_aggregate(
            &mut self,
            tag: AstTag,
            name: &str,
            inherits: Vec<Expr>,
            children: Vec<Decl>,
            parent: AstId,
            parent_path: Atom,
        ) -> AstId {
            let path = self.symbol_path(parent_path, name);
            let id = AstId::new(path, -1);
            let mut numbering = SymbolNumbering { symbol: path, next: 0 };

            let inherit_exprs: Vec<AstId> = inherits
                .into_iter()
                .map(|e| {
                    let eid = self.lower_expr(e, &mut numbering);
                    self.reparent(eid, id);
                    eid
                })
                .collect();
            let child_ids: Vec<AstId> = children
                .into_iter()
                .map(|d| self.lower_decl(d, id, path, &mut numbering))
                .collect();

            let decl = AggregateDecl {
                name: self.strings.intern(name),
                children: child_ids,
                inherit_exprs,
            };
            let contained = numbering.next as u32;
            self.program.insert(AstNode {
                id,
                parent,
                contained,
                kind: match tag {
                    AstTag::Record => AstKind::Record(decl),
                    AstTag::Class => AstKind::Class(decl),
                    AstTag::Union => AstKind::Union(decl),
                    _ => unreachable!("not an aggregate tag"),
                },
            });
            id
        }

        fn lower_fn(&mut self, spec: FnSpec, parent: AstId, parent_path: Atom) -> AstId {
            let path = self.symbol_path(parent_path, &spec.name);
            let id = AstId::new(path, -1);
            let mut numbering = SymbolNumbering { symbol: path, next: 0 };

            let mut formals = Vec::new();
            if spec.is_method {
                // a method spec without a receiver gets no `this` formal
                if let Some(receiver) = spec.receiver {
                    let this_formal = FormalSpec {
                        name: "this".to_string(),
                        intent: spec.receiver_intent,
                        type_expr: Some(receiver),
                        init_expr: None,
                        is_vararg: false,
                        count_expr: None,
                    };
                    formals.push(self.lower_formal(this_formal, id, &mut numbering));
                }
            }
            for f in spec.formals {
                formals.push(self.lower_formal(f, id, &mut numbering));
            }

            let where_clause = spec.where_clause.map(|e| {
                let eid = self.lower_expr(e, &mut numbering);
                self.reparent(eid, id);
                eid
            });
            let return_type = spec.return_type.map(|e| {
                let eid = self.lower_expr(e, &mut numbering);
                self.reparent(eid, id);
                eid
            });
            let body: Vec<AstId> = spec
                .body
                .into_iter()
                .map(|e| {
                    let eid = self.lower_expr(e, &mut numbering);
                    self.reparent(eid, id);
                    eid
                })
                .collect();

            let contained = numbering.next as u32;
            self.program.insert(AstNode {
                id,
                parent,
                contained,
                kind: AstKind::Function(FunctionDecl {
                    name: self.strings.intern(&spec.name),
                    kind: spec.kind,
                    is_method: spec.is_method,
                    is_parenless: spec.is_parenless,
                    throws: spec.throws,
                    is_compiler_generated: false,
                    formals,
                    where_clause,
                    return_type,
                    body,
                }),
            });
            id
        }

        fn lower_formal(
            &mut self,
            spec: FormalSpec,
            parent: AstId,
            numbering: &mut SymbolNumbering,
        ) -> AstId {
            let type_id = spec.type_expr.map(|e| self.lower_expr(e, numbering));
            let init_id = spec.init_expr.map(|e| self.lower_expr(e, numbering));
            let count_id = spec.count_expr.map(|e| self.lower_expr(e, numbering));
            let id = numbering.alloc();
            let mut contained = 0;
            for child in [type_id, init_id, count_id].into_iter().flatten() {
                self.reparent(child, id);
                contained += self.subtree_size(child) + 1;
            }
            let decl = FormalDecl {
                name: self.strings.intern(&spec.name),
                intent: spec.intent,
                type_expr: type_id,
                init_expr: init_id,
                count_expr: count_id,
            };
            self.program.insert(AstNode {
                id,
                parent,
                contained,
                kind: if spec.is_vararg {
                    AstKind::VarArgFormal(decl)
                } else {
                    AstKind::Formal(decl)
                },
            });
            id
        }

        fn lower_expr(&mut self, expr: Expr, numbering: &mut SymbolNumbering) -> AstId {
            match expr {
                Expr::Ident(name) => self.leaf(
                    numbering,
                    AstKind::Identifier {
                        name: self.strings.intern(&name),
                    },
                ),
                Expr::TypeQuery(name) => self.leaf(
                    numbering,
                    AstKind::TypeQuery {
                        name: self.strings.intern(&name),
                    },
                ),
                Expr::Bool(v) => self.leaf(numbering, AstKind::Literal(LiteralValue::Bool(v))),
                Expr::Int(v) => self.leaf(numbering, AstKind::Literal(LiteralValue::Int(v))),
                Expr::Uint(v) => self.leaf(numbering, AstKind::Literal(LiteralValue::Uint(v))),
                Expr::Real(v) => self.leaf(numbering, AstKind::Literal(LiteralValue::Real(v))),
                Expr::Imag(v) => self.leaf(numbering, AstKind::Literal(LiteralValue::Imag(v))),
                Expr::Str(v) => {
                    let atom = self.strings.intern(&v);
                    self.leaf(numbering, AstKind::Literal(LiteralValue::String(atom)))
                }
                Expr::Call {
                    callee,
                    actuals,
                    has_question_arg,
                } => {
                    let callee_id = self.lower_expr(*callee, numbering);
                    let mut actual_ids = Vec::new();
                    let mut actual_names = Vec::new();
                    for actual in actuals {
                        actual_ids.push(self.lower_expr(actual.expr, numbering));
                        actual_names.push(match actual.name {
                            Some(n) => self.strings.intern(&n),
                            None => Atom::NONE,
                        });
                    }
                    let id = numbering.alloc();
                    let mut contained = self.subtree_size(callee_id) + 1;
                    self.reparent(callee_id, id);
                    for &a in &actual_ids {
                        self.reparent(a, id);
                        contained += self.subtree_size(a) + 1;
                    }
                    self.program.insert(AstNode {
                        id,
                        parent: AstId::NONE,
                        contained,
                        kind: AstKind::Call(CallExpr {
                            callee: callee_id,
                            op_name: Atom::NONE,
                            actuals: actual_ids,
                            actual_names,
                            has_question_arg,
                        }),
                    });
                    id
                }
                Expr::Op { name, actuals } => {
                    let actual_ids: Vec<AstId> = actuals
                        .into_iter()
                        .map(|e| self.lower_expr(e, numbering))
                        .collect();
                    let actual_names = vec![Atom::NONE; actual_ids.len()];
                    let id = numbering.alloc();
                    let mut contained = 0;
                    for &a in &actual_ids {
                        self.reparent(a, id);
                        contained += self.subtree_size(a) + 1;
                    }
                    self.program.insert(AstNode {
                        id,
                        parent: AstId::NONE,
                        contained,
                        kind: AstKind::OpCall(CallExpr {
                            callee: AstId::NONE,
                            op_name: self.strings.intern(&name),
                            actuals: actual_ids,
                            actual_names,
                            has_question_arg: false,
                        }),
                    });
                    id
                }
                Expr::Dot { receiver, field } => {
                    let recv_id = self.lower_expr(*receiver, numbering);
                    let id = numbering.alloc();
                    self.reparent(recv_id, id);
                    self.program.insert(AstNode {
                        id,
                        parent: AstId::NONE,
                        contained: self.subtree_size(recv_id) + 1,
                        kind: AstKind::Dot {
                            receiver: recv_id,
                            field: self.strings.intern(&field),
                        },
                    });
                    id
                }
                Expr::New(inner) => {
                    let inner_id = self.lower_expr(*inner, numbering);
                    let id = numbering.alloc();
                    self.reparent(inner_id, id);
                    self.program.insert(AstNode {
                        id,
                        parent: AstId::NONE,
                        contained: self.subtree_size(inner_id) + 1,
                        kind: AstKind::New { type_expr: inner_id },
                    });
                    id
                }
                Expr::Tuple(elements) => {
                    let element_ids: Vec<AstId> = elements
                        .into_iter()
                        .map(|e| self.lower_expr(e, numbering))
                        .collect();
                    let id = numbering.alloc();
                    let mut contained = 0;
                    for &e in &element_ids {
                        self.reparent(e, id);
                        contained += self.subtree_size(e) + 1;
                    }
                    self.program.insert(AstNode {
                        id,
                        parent: AstId::NONE,
                        contained,
                        kind: AstKind::Tuple { elements: element_ids },
                    });
                    id
                }
            }
        }

        fn leaf(&mut self, numbering: &mut SymbolNumbering, kind: AstKind) -> AstId {
            let id = numbering.alloc();
            self.program.insert(AstNode {
                id,
                parent: AstId::NONE,
                contained: 0,
                kind,
            });
            id
        }

        fn reparent(&mut self, child: AstId, parent: AstId) {
            if let Some(node) = self.program.nodes.get_mut(&child) {
                node.parent = parent;
            }
        }

        fn subtree_size(&self, id: AstId) -> u32 {
            self.program.nodes.get(&id).map(|n| n.contained).unwrap_or(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::build::*;
    use super::*;
    use crate::interner::StringInterner;

    #[test]
    fn test_postorder_numbering() {
        let strings = StringInterner::new();
        let mut program = Program::new();
        let mut lowering = Lowering::new(&strings, &mut program);
        // var x = f(1, 2);
        let module_id = lowering.module(
            "M",
            vec![var("x", None, Some(call(ident("f"), vec![int(1), int(2)])))],
        );

        let module = program.id_to_ast(module_id).unwrap();
        let AstKind::Module(m) = &module.kind else {
            panic!("expected module")
        };
        assert_eq!(m.stmts.len(), 1);

        let var_id = m.stmts[0];
        // children numbered before the decl itself
        assert!(var_id.post_order > 0);
        let var_node = program.id_to_ast(var_id).unwrap();
        assert_eq!(var_node.tag(), AstTag::Variable);
        assert_eq!(var_node.contained, var_id.post_order as u32);
    }

    #[test]
    fn test_field_queries() {
        let strings = StringInterner::new();
        let mut program = Program::new();
        let mut lowering = Lowering::new(&strings, &mut program);
        lowering.module(
            "M",
            vec![Decl::Record {
                name: "R".to_string(),
                children: vec![
                    var("x", Some(ident("int")), None),
                    Decl::Forwarding { expr: ident("x") },
                ],
            }],
        );

        let rec_path = strings.intern("M.R");
        let rec_id = AstId::new(rec_path, -1);
        assert!(program.aggregate_uses_forwarding(rec_id));
        assert!(program.id_contains_field_with_name(rec_id, strings.intern("x")));
        assert!(!program.id_contains_field_with_name(rec_id, strings.intern("y")));
    }
}
