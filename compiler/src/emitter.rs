// emitter.rs — Code emitter capability and the reference C++ emitter
//
// Lowering never writes target syntax itself: every fragment is produced by
// one call on a `CodeEmitter` with fully-resolved names and types, and the
// results are concatenated. `CppEmitter` is the reference implementation.
//
// Preconditions: names passed in are valid target identifiers.
// Postconditions: statement-level fragments end with a newline; expression
//   fragments (`call`, `binary`, `literal`, ...) do not.
// Failure modes: none.
// Side effects: none.

use crate::tree::{BinaryOp, Literal, SourceLoc, UnaryOp, ValueType};

/// A parameter of a generated method or constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: ValueType,
    /// Element count when the parameter is a bundle.
    pub size: Option<usize>,
    /// Outputs are passed by reference.
    pub by_ref: bool,
}

/// Constructor of a generated module type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Ctor {
    pub params: Vec<Param>,
    pub body: String,
}

pub trait CodeEmitter {
    fn type_name(&self, ty: ValueType) -> String;

    // ── Declarations ──
    fn declare_scalar(&self, name: &str, ty: ValueType) -> String;
    fn declare_bundle(&self, name: &str, ty: ValueType, size: usize) -> String;
    fn declare_module(&self, name: &str, type_name: &str, consts: &[String]) -> String;
    fn declare_reaction(&self, name: &str, type_name: &str) -> String;
    fn declare_buffer(&self, name: &str, type_name: &str, size: usize) -> String;
    fn module_type(&self, name: &str, fields: &str, ctor: &Ctor, methods: &[String]) -> String;
    fn method(&self, name: &str, params: &[Param], body: &str) -> String;
    /// A method returning a value of type `ty`.
    fn value_method(&self, name: &str, ty: ValueType, params: &[Param], body: &str) -> String;

    // ── Statements ──
    fn assign(&self, lhs: &str, rhs: &str, cast: Option<ValueType>) -> String;
    fn increment(&self, lhs: &str, rhs: &str) -> String;
    fn expression_statement(&self, expr: &str) -> String;
    fn conditional(&self, cond: &str, body: &str) -> String;
    fn while_loop(&self, cond: &str, body: &str) -> String;
    fn comment(&self, text: &str) -> String;
    fn return_value(&self, expr: &str) -> String;

    // ── Expressions ──
    fn literal(&self, value: &Literal) -> String;
    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> String;
    fn unary(&self, op: UnaryOp, value: &str) -> String;
    fn call(&self, target: &str, method: &str, args: &[String]) -> String;
    fn bundle_index(&self, name: &str, index: &str) -> String;
    /// Convert a 1-based runtime index expression to 0-based.
    fn zero_based(&self, index: &str) -> String;
    fn buffer_write(&self, buffer: &str, token: &str) -> String;
    fn buffer_read(&self, buffer: &str, token: &str) -> String;
    fn buffer_copy(&self, buffer: &str, token: &str) -> String;

    // ── Layout ──
    fn stream_begin(&self, index: usize, loc: &SourceLoc) -> String {
        let mut code = self.comment(&format!("Starting stream {:02} -------------------------", index));
        if let Some(line) = loc.line {
            code.push_str(&format!("//#line {} \"{}\"\n", line, loc.filename));
        }
        code
    }

    fn stream_end(&self, index: usize) -> String {
        self.comment(&format!("Stream End {:02}", index))
    }

    fn include(&self, header: &str) -> String;
}

/// Render a real value: integral values keep one decimal, others take the
/// float suffix.
pub fn real_literal(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{:.1}", value)
    } else {
        format!("{}f", value)
    }
}

/// Rate increments keep ten decimals.
pub fn ratio_literal(value: f64) -> String {
    format!("{:.10}", value)
}

fn indent(body: &str) -> String {
    body.lines()
        .map(|l| if l.is_empty() { "\n".to_string() } else { format!("    {}\n", l) })
        .collect()
}

// ── Reference C++ emitter ───────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CppEmitter;

impl CppEmitter {
    fn param(&self, p: &Param) -> String {
        let ty = self.type_name(p.ty);
        match (p.size, p.by_ref) {
            (Some(size), _) => format!("{} {}[{}]", ty, p.name, size),
            (None, true) => format!("{} &{}", ty, p.name),
            (None, false) => format!("{} {}", ty, p.name),
        }
    }

    fn params(&self, params: &[Param]) -> String {
        params.iter().map(|p| self.param(p)).collect::<Vec<_>>().join(", ")
    }
}

impl CodeEmitter for CppEmitter {
    fn type_name(&self, ty: ValueType) -> String {
        match ty {
            ValueType::Real => "float",
            ValueType::Int => "int",
            ValueType::Bool => "bool",
            ValueType::Str => "std::string",
        }
        .to_string()
    }

    fn declare_scalar(&self, name: &str, ty: ValueType) -> String {
        format!("{} {};\n", self.type_name(ty), name)
    }

    fn declare_bundle(&self, name: &str, ty: ValueType, size: usize) -> String {
        format!("{} {}[{}];\n", self.type_name(ty), name, size)
    }

    fn declare_module(&self, name: &str, type_name: &str, consts: &[String]) -> String {
        if consts.is_empty() {
            format!("{} {};\n", type_name, name)
        } else {
            format!("{} {}{{{}}};\n", type_name, name, consts.join(", "))
        }
    }

    fn declare_reaction(&self, name: &str, type_name: &str) -> String {
        format!("{} {};\n", type_name, name)
    }

    fn declare_buffer(&self, name: &str, type_name: &str, size: usize) -> String {
        format!("{} {}{{{}}};\n", type_name, name, size)
    }

    fn module_type(&self, name: &str, fields: &str, ctor: &Ctor, methods: &[String]) -> String {
        let mut body = String::from(fields);
        body.push_str(&format!("{}({}) {{\n", name, self.params(&ctor.params)));
        body.push_str(&indent(&ctor.body));
        body.push_str("}\n");
        for m in methods {
            body.push_str(m);
        }
        format!("class {} {{\npublic:\n{}}};\n", name, indent(&body))
    }

    fn method(&self, name: &str, params: &[Param], body: &str) -> String {
        format!("void {}({}) {{\n{}}}\n", name, self.params(params), indent(body))
    }

    fn value_method(&self, name: &str, ty: ValueType, params: &[Param], body: &str) -> String {
        format!(
            "{} {}({}) {{\n{}}}\n",
            self.type_name(ty),
            name,
            self.params(params),
            indent(body)
        )
    }

    fn assign(&self, lhs: &str, rhs: &str, cast: Option<ValueType>) -> String {
        if lhs == rhs {
            return String::new();
        }
        match cast {
            Some(ty) => format!("{} = {}({});\n", lhs, self.type_name(ty), rhs),
            None => format!("{} = {};\n", lhs, rhs),
        }
    }

    fn increment(&self, lhs: &str, rhs: &str) -> String {
        format!("{} += {};\n", lhs, rhs)
    }

    fn expression_statement(&self, expr: &str) -> String {
        format!("{};\n", expr)
    }

    fn conditional(&self, cond: &str, body: &str) -> String {
        format!("if ({}) {{\n{}}}\n", cond, indent(body))
    }

    fn while_loop(&self, cond: &str, body: &str) -> String {
        format!("while ({}) {{\n{}}}\n", cond, indent(body))
    }

    fn comment(&self, text: &str) -> String {
        format!("// {}\n", text)
    }

    fn return_value(&self, expr: &str) -> String {
        format!("return {};\n", expr)
    }

    fn literal(&self, value: &Literal) -> String {
        match value {
            Literal::Bool(true) => "true".into(),
            Literal::Bool(false) => "false".into(),
            Literal::Real(v) => real_literal(*v),
            Literal::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
            Literal::List(items) => {
                let inner: Vec<String> = items.iter().map(|i| self.literal(i)).collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }

    fn binary(&self, op: BinaryOp, left: &str, right: &str) -> String {
        let sym = match op {
            BinaryOp::Add => "+",
            BinaryOp::Subtract => "-",
            BinaryOp::Multiply => "*",
            BinaryOp::Divide => "/",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::Greater => ">",
            BinaryOp::Lesser => "<",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::LesserEqual => "<=",
        };
        format!("({} {} {})", left, sym, right)
    }

    fn unary(&self, op: UnaryOp, value: &str) -> String {
        match op {
            UnaryOp::UnaryMinus => format!("(-{})", value),
            UnaryOp::LogicalNot => format!("(!{})", value),
        }
    }

    fn call(&self, target: &str, method: &str, args: &[String]) -> String {
        format!("{}.{}({})", target, method, args.join(", "))
    }

    fn bundle_index(&self, name: &str, index: &str) -> String {
        format!("{}[{}]", name, index)
    }

    fn zero_based(&self, index: &str) -> String {
        format!("(int)({} - 1)", index)
    }

    fn buffer_write(&self, buffer: &str, token: &str) -> String {
        format!("{}.write({})", buffer, token)
    }

    fn buffer_read(&self, buffer: &str, token: &str) -> String {
        format!("{}.read({})", buffer, token)
    }

    fn buffer_copy(&self, buffer: &str, token: &str) -> String {
        format!("{}.copy({})", buffer, token)
    }

    fn include(&self, header: &str) -> String {
        format!("#include <{}>\n", header)
    }
}
