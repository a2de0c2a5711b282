//! Modules defined by `output = expression` strings.
//!
//! Each right-hand side is parsed into an [`Expr`] tree, then compiled into a
//! flat [`Bytecode`] program whose variable loads are indices into the
//! module's input list. Evaluation runs the programs on a small value stack.

use crate::error::{Error, Result};
use crate::module::{
    Derivatives, DifferentialModule, Inputs, Module, ModuleCreator, ModuleDescriptor, ModuleKind,
    Outputs, SteadyStateModule,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Instructions for the stack machine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant.
    LoadConst(f64),
    /// Pushes the value of the module input at this index.
    LoadInput(usize),
    /// Pops b, a; pushes a + b.
    Add,
    /// Pops b, a; pushes a - b.
    Sub,
    /// Pops b, a; pushes a * b.
    Mul,
    /// Pops b, a; pushes a / b.
    Div,
    /// Pops b, a; pushes a ^ b.
    Pow,
    Neg,
    Call(Function),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Exp,
    Ln,
    Sqrt,
    Abs,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Function::Sin),
            "cos" => Some(Function::Cos),
            "exp" => Some(Function::Exp),
            "ln" => Some(Function::Ln),
            "sqrt" => Some(Function::Sqrt),
            "abs" => Some(Function::Abs),
            _ => None,
        }
    }

    fn apply(self, x: f64) -> f64 {
        match self {
            Function::Sin => x.sin(),
            Function::Cos => x.cos(),
            Function::Exp => x.exp(),
            Function::Ln => x.ln(),
            Function::Sqrt => x.sqrt(),
            Function::Abs => x.abs(),
        }
    }
}

/// A compiled expression together with the stack depth it needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
    pub max_depth: usize,
}

impl Bytecode {
    /// Runs the program against `inputs`, using `stack` as scratch space.
    pub fn execute(&self, inputs: &[f64], stack: &mut Vec<f64>) -> f64 {
        stack.clear();
        for op in &self.ops {
            match *op {
                OpCode::LoadConst(value) => stack.push(value),
                OpCode::LoadInput(idx) => stack.push(inputs[idx]),
                OpCode::Neg => {
                    let a = pop(stack);
                    stack.push(-a);
                }
                OpCode::Call(function) => {
                    let a = pop(stack);
                    stack.push(function.apply(a));
                }
                binary => {
                    let b = pop(stack);
                    let a = pop(stack);
                    stack.push(match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    });
                }
            }
        }
        pop(stack)
    }
}

// Compiled programs are balanced, so an empty stack only happens for malformed bytecode.
fn pop(stack: &mut Vec<f64>) -> f64 {
    stack.pop().unwrap_or(f64::NAN)
}

// --- AST & Parser ---

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Neg(Box<Expr>),
    Call(Function, Box<Expr>),
}

impl Expr {
    /// Collects referenced identifiers in first-appearance order.
    fn variables<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Expr::Number(_) => {}
            Expr::Variable(name) => {
                if !out.contains(&name.as_str()) {
                    out.push(name);
                }
            }
            Expr::Binary(left, _, right) => {
                left.variables(out);
                right.variables(out);
            }
            Expr::Neg(inner) | Expr::Call(_, inner) => inner.variables(out),
        }
    }
}

/// Parses an expression string into an AST.
pub fn parse(input: &str) -> std::result::Result<Expr, String> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_sum()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(format!("unexpected trailing token {token:?}")),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut text = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign = (d == '-' || d == '+') && text.ends_with(['e', 'E']);
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    text.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = text
                .parse()
                .map_err(|_| format!("invalid number `{text}`"))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => return Err(format!("unexpected character `{other}`")),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect_rparen(&mut self) -> std::result::Result<(), String> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err("expected ')'".to_string()),
        }
    }

    fn parse_sum(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => '+',
                Some(Token::Minus) => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> std::result::Result<Expr, String> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => '*',
                Some(Token::Slash) => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    // Unary minus binds looser than `^`, so `-x^2` is `-(x^2)`.
    fn parse_unary(&mut self) -> std::result::Result<Expr, String> {
        if let Some(Token::Minus) = self.peek() {
            self.consume();
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.parse_power()
    }

    fn parse_power(&mut self) -> std::result::Result<Expr, String> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> std::result::Result<Expr, String> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let function = Function::from_name(&name)
                        .ok_or_else(|| format!("unknown function `{name}`"))?;
                    let arg = self.parse_sum()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(function, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_sum()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(format!("unexpected token {token:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

// --- Compiler ---

/// Compiles ASTs, resolving identifiers to input indices.
pub struct Compiler {
    input_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(input_names: &[String]) -> Self {
        let input_map = input_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { input_map }
    }

    pub fn compile(&self, expr: &Expr) -> std::result::Result<Bytecode, String> {
        let mut ops = Vec::new();
        let max_depth = self.compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops, max_depth })
    }

    /// Emits code for `expr` and returns the stack depth it needs.
    fn compile_recursive(
        &self,
        expr: &Expr,
        ops: &mut Vec<OpCode>,
    ) -> std::result::Result<usize, String> {
        match expr {
            Expr::Number(n) => {
                ops.push(OpCode::LoadConst(*n));
                Ok(1)
            }
            Expr::Variable(name) => {
                let idx = self
                    .input_map
                    .get(name)
                    .ok_or_else(|| format!("unknown quantity `{name}`"))?;
                ops.push(OpCode::LoadInput(*idx));
                Ok(1)
            }
            Expr::Binary(left, op, right) => {
                let left_depth = self.compile_recursive(left, ops)?;
                let right_depth = self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    '^' => OpCode::Pow,
                    other => return Err(format!("unknown binary operator `{other}`")),
                });
                Ok(left_depth.max(right_depth + 1))
            }
            Expr::Neg(inner) => {
                let depth = self.compile_recursive(inner, ops)?;
                ops.push(OpCode::Neg);
                Ok(depth)
            }
            Expr::Call(function, inner) => {
                let depth = self.compile_recursive(inner, ops)?;
                ops.push(OpCode::Call(*function));
                Ok(depth)
            }
        }
    }
}

// --- Expression modules ---

#[derive(Debug)]
struct Program {
    inputs: Vec<String>,
    outputs: Vec<String>,
    equations: Vec<Bytecode>,
    max_depth: usize,
}

impl Program {
    /// Evaluates every equation, calling `emit` with each output name and value.
    fn evaluate(
        &self,
        inputs: &Inputs<'_>,
        mut emit: impl FnMut(&str, f64) -> Result<()>,
    ) -> Result<()> {
        let values = self
            .inputs
            .iter()
            .map(|name| inputs.get(name))
            .collect::<Result<Vec<_>>>()?;
        let mut stack = Vec::with_capacity(self.max_depth);
        for (output, code) in self.outputs.iter().zip(&self.equations) {
            emit(output, code.execute(&values, &mut stack))?;
        }
        Ok(())
    }
}

struct ExpressionModule {
    program: Arc<Program>,
}

impl SteadyStateModule for ExpressionModule {
    fn run(&self, inputs: &Inputs<'_>, outputs: &mut Outputs<'_>) -> Result<()> {
        self.program
            .evaluate(inputs, |name, value| outputs.set(name, value))
    }
}

impl DifferentialModule for ExpressionModule {
    fn run(&self, inputs: &Inputs<'_>, derivatives: &mut Derivatives<'_>) -> Result<()> {
        self.program
            .evaluate(inputs, |name, value| derivatives.add(name, value))
    }
}

/// A module creator whose formulas are given as expression strings.
///
/// ```
/// use canopy_core::expression::ExpressionModuleCreator;
/// use canopy_core::module::ModuleCreator;
///
/// let creator = ExpressionModuleCreator::from_definitions(
///     "decay",
///     canopy_core::ModuleKind::Differential,
///     &["x = -rate * x"],
/// )
/// .unwrap();
/// assert_eq!(creator.inputs(), &["rate".to_string(), "x".to_string()]);
/// ```
#[derive(Debug)]
pub struct ExpressionModuleCreator {
    descriptor: ModuleDescriptor,
    program: Arc<Program>,
}

impl ExpressionModuleCreator {
    /// Builds a creator from `(output, expression)` pairs.
    pub fn new<O, E>(
        name: &str,
        kind: ModuleKind,
        equations: impl IntoIterator<Item = (O, E)>,
    ) -> Result<Self>
    where
        O: Into<String>,
        E: AsRef<str>,
    {
        let expression_error = |message: String| Error::Expression {
            module: name.to_string(),
            message,
        };

        let mut outputs: Vec<String> = Vec::new();
        let mut trees = Vec::new();
        for (output, source) in equations {
            let output = output.into();
            if outputs.contains(&output) {
                return Err(expression_error(format!("`{output}` is defined twice")));
            }
            let tree = parse(source.as_ref())
                .map_err(|e| expression_error(format!("`{output}`: {e}")))?;
            outputs.push(output);
            trees.push(tree);
        }
        if outputs.is_empty() {
            return Err(expression_error("no equations given".to_string()));
        }

        let mut referenced = Vec::new();
        for tree in &trees {
            tree.variables(&mut referenced);
        }
        let inputs: Vec<String> = referenced.into_iter().map(str::to_string).collect();

        let compiler = Compiler::new(&inputs);
        let equations = trees
            .iter()
            .map(|tree| compiler.compile(tree).map_err(&expression_error))
            .collect::<Result<Vec<_>>>()?;
        let max_depth = equations.iter().map(|e| e.max_depth).max().unwrap_or(1);

        let descriptor = ModuleDescriptor {
            name: name.to_string(),
            kind,
            inputs: inputs.clone(),
            outputs: outputs.clone(),
            requires_euler: false,
        };
        Ok(Self {
            descriptor,
            program: Arc::new(Program {
                inputs,
                outputs,
                equations,
                max_depth,
            }),
        })
    }

    /// Builds a creator from `"output = expression"` lines.
    pub fn from_definitions(name: &str, kind: ModuleKind, definitions: &[&str]) -> Result<Self> {
        let equations = definitions
            .iter()
            .map(|line| {
                line.split_once('=')
                    .map(|(lhs, rhs)| (lhs.trim().to_string(), rhs.to_string()))
                    .ok_or_else(|| Error::Expression {
                        module: name.to_string(),
                        message: format!("`{line}` is not of the form `output = expression`"),
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(name, kind, equations)
    }

    pub fn euler_only(mut self) -> Self {
        self.descriptor.requires_euler = true;
        self
    }
}

impl ModuleCreator for ExpressionModuleCreator {
    fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    fn create_module(&self) -> Module {
        let module = ExpressionModule {
            program: Arc::clone(&self.program),
        };
        match self.descriptor.kind {
            ModuleKind::SteadyState => Module::SteadyState {
                name: self.descriptor.name.clone(),
                module: Box::new(module),
            },
            ModuleKind::Differential => Module::Differential {
                name: self.descriptor.name.clone(),
                module: Box::new(module),
            },
        }
    }
}
