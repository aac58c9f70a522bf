use crate::error::ExpressionError;
use crate::traits::{Derivative, Scalar};
use std::fmt;

/// Names of the free variables, in the order the VM expects them.
pub const VARIABLES: [&str; 2] = ["x", "y"];

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of a variable (by index) onto the stack.
    /// Indices follow `VARIABLES` (0=x, 1=y).
    LoadVar(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes -a.
    Neg,
    /// Pops top value (a), pushes func(a).
    Call(Function),
}

/// Named unary functions understood by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Exp,
    /// Natural logarithm.
    Log,
    Sqrt,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "sin" => Some(Function::Sin),
            "cos" => Some(Function::Cos),
            "tan" => Some(Function::Tan),
            "exp" => Some(Function::Exp),
            "log" => Some(Function::Log),
            "sqrt" => Some(Function::Sqrt),
            _ => None,
        }
    }

    fn apply<T: Scalar>(self, a: T) -> T {
        match self {
            Function::Sin => a.sin(),
            Function::Cos => a.cos(),
            Function::Tan => a.tan(),
            Function::Exp => a.exp(),
            Function::Log => a.ln(),
            Function::Sqrt => a.sqrt(),
        }
    }
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

/// Stack-based Virtual Machine for evaluating equations.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `vars`: Variable values (read-only).
/// - `stack`: A mutable buffer for intermediate computations.
pub struct VM;

impl VM {
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        vars: &[T],
        stack: &mut Vec<T>,
    ) -> Result<T, ExpressionError> {
        stack.clear();

        for op in &bytecode.ops {
            match *op {
                OpCode::LoadConst(val) => {
                    let value = T::from_f64(val)
                        .ok_or(ExpressionError::MalformedBytecode("constant out of range"))?;
                    stack.push(value);
                }
                OpCode::LoadVar(idx) => {
                    let value = vars
                        .get(idx)
                        .copied()
                        .ok_or(ExpressionError::MalformedBytecode("variable index out of range"))?;
                    stack.push(value);
                }
                OpCode::Add => binary(stack, |a, b| a + b)?,
                OpCode::Sub => binary(stack, |a, b| a - b)?,
                OpCode::Mul => binary(stack, |a, b| a * b)?,
                OpCode::Div => binary(stack, |a, b| a / b)?,
                OpCode::Pow => binary(stack, |a, b| a.powf(b))?,
                OpCode::Neg => {
                    let a = pop(stack)?;
                    stack.push(-a);
                }
                OpCode::Call(func) => {
                    let a = pop(stack)?;
                    stack.push(func.apply(a));
                }
            }
        }

        let result = pop(stack)?;
        if !stack.is_empty() {
            return Err(ExpressionError::MalformedBytecode("values left on stack"));
        }
        Ok(result)
    }
}

fn pop<T>(stack: &mut Vec<T>) -> Result<T, ExpressionError> {
    stack
        .pop()
        .ok_or(ExpressionError::MalformedBytecode("stack underflow"))
}

fn binary<T: Scalar>(stack: &mut Vec<T>, op: impl Fn(T, T) -> T) -> Result<(), ExpressionError> {
    let b = pop(stack)?;
    let a = pop(stack)?;
    stack.push(op(a, b));
    Ok(())
}

// --- AST & Parser ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, BinaryOp, Box<Expr>),
    Negate(Box<Expr>),
    Call(Function, Box<Expr>),
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable names to indices into `VARIABLES`.
pub struct Compiler;

impl Compiler {
    pub fn compile(expr: &Expr) -> Result<Bytecode, ExpressionError> {
        let mut ops = Vec::new();
        Self::compile_recursive(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn compile_recursive(expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), ExpressionError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                let idx = VARIABLES
                    .iter()
                    .position(|var| *var == name.as_str())
                    .ok_or_else(|| ExpressionError::UnknownSymbol(name.clone()))?;
                ops.push(OpCode::LoadVar(idx));
            }
            Expr::Binary(left, op, right) => {
                Self::compile_recursive(left, ops)?;
                Self::compile_recursive(right, ops)?;
                ops.push(match op {
                    BinaryOp::Add => OpCode::Add,
                    BinaryOp::Sub => OpCode::Sub,
                    BinaryOp::Mul => OpCode::Mul,
                    BinaryOp::Div => OpCode::Div,
                    BinaryOp::Pow => OpCode::Pow,
                });
            }
            Expr::Negate(operand) => {
                Self::compile_recursive(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(func, arg) => {
                Self::compile_recursive(arg, ops)?;
                ops.push(OpCode::Call(*func));
            }
        }
        Ok(())
    }
}

// --- Parser ---

/// Nesting limit for parentheses, unary signs, exponents and operator chains.
/// Keeps the parser, the compiler and `Expr` drops within a bounded stack.
pub const MAX_DEPTH: usize = 256;

/// Parses a string expression into an AST.
pub fn parse(input: &str) -> Result<Expr, ExpressionError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.parse_expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
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

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Identifier(name) => write!(f, "'{name}'"),
            Token::Plus => write!(f, "'+'"),
            Token::Minus => write!(f, "'-'"),
            Token::Star => write!(f, "'*'"),
            Token::Slash => write!(f, "'/'"),
            Token::Caret => write!(f, "'^'"),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExpressionError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_ascii_digit() || d == '.' {
                    num_str.push(d);
                    chars.next();
                } else if d == 'e' || d == 'E' {
                    // Exponent only if digits follow; `2exp(x)` stays a number then an identifier.
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    let mut exponent = String::from(d);
                    if let Some(&(_, sign)) = lookahead.peek() {
                        if sign == '+' || sign == '-' {
                            exponent.push(sign);
                            lookahead.next();
                        }
                    }
                    if !matches!(lookahead.peek(), Some(&(_, digit)) if digit.is_ascii_digit()) {
                        break;
                    }
                    while let Some(&(_, digit)) = lookahead.peek() {
                        if !digit.is_ascii_digit() {
                            break;
                        }
                        exponent.push(digit);
                        lookahead.next();
                    }
                    num_str.push_str(&exponent);
                    chars = lookahead;
                    break;
                } else {
                    break;
                }
            }
            let value = num_str
                .parse()
                .map_err(|_| ExpressionError::InvalidNumber(num_str.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&(_, d)) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            let token = match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => return Err(ExpressionError::UnexpectedCharacter { ch: c, position }),
            };
            tokens.push(token);
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
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

    fn enter(&mut self) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ExpressionError::TooDeep(MAX_DEPTH));
        }
        Ok(())
    }

    fn expect_rparen(&mut self) -> Result<(), ExpressionError> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
            None => Err(ExpressionError::UnbalancedParentheses),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_product()?;
        let entry_depth = self.depth;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.consume();
            // Chains build left-nested trees.
            self.enter()?;
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.depth = entry_depth;
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr, ExpressionError> {
        let mut left = self.parse_unary()?;
        let entry_depth = self.depth;

        while let Some(token) = self.peek() {
            let op = match token {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                _ => break,
            };
            self.consume();
            self.enter()?;
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        self.depth = entry_depth;
        Ok(left)
    }

    /// Every recursive descent passes through here, so this is where the
    /// nesting depth is charged.
    fn parse_unary(&mut self) -> Result<Expr, ExpressionError> {
        self.enter()?;
        let expr = self.parse_signed()?;
        self.depth -= 1;
        Ok(expr)
    }

    fn parse_signed(&mut self) -> Result<Expr, ExpressionError> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                let expr = self.parse_unary()?;
                Ok(Expr::Negate(Box::new(expr)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    /// `^` binds tighter than unary minus and associates to the right.
    fn parse_power(&mut self) -> Result<Expr, ExpressionError> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), BinaryOp::Pow, Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr, ExpressionError> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let func = Function::from_name(&name)
                        .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(func, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(ExpressionError::UnexpectedToken(token.to_string())),
            None => Err(ExpressionError::UnexpectedEnd),
        }
    }
}

// --- Expression ---

/// A user-supplied right-hand side `f(x, y)`, parsed and compiled once.
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    bytecode: Bytecode,
}

impl Expression {
    /// Parses and compiles `source`. Unknown symbols are rejected here, not at
    /// evaluation time.
    pub fn parse(source: &str) -> Result<Self, ExpressionError> {
        let ast = parse(source)?;
        let bytecode = Compiler::compile(&ast)?;
        Ok(Self {
            source: source.trim().to_string(),
            bytecode,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn bytecode(&self) -> &Bytecode {
        &self.bytecode
    }

    /// Evaluates the expression at `(x, y)`. Non-finite results are errors.
    pub fn eval(&self, x: f64, y: f64) -> Result<f64, ExpressionError> {
        let mut stack = Vec::with_capacity(self.bytecode.ops.len());
        let value = VM::execute(&self.bytecode, &[x, y], &mut stack)?;
        if !value.is_finite() {
            return Err(ExpressionError::NonFinite { x, y, value });
        }
        Ok(value)
    }
}

impl Derivative for Expression {
    fn evaluate(&self, x: f64, y: f64) -> Result<f64, ExpressionError> {
        self.eval(x, y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(source: &str, x: f64, y: f64) -> f64 {
        Expression::parse(source)
            .expect("expression should parse")
            .eval(x, y)
            .expect("expression should evaluate")
    }

    #[test]
    fn evaluates_product_of_variables() {
        assert_eq!(eval("2*x*y", 1.0, 1.0), 2.0);
        assert_eq!(eval("2*x*y", 3.0, -0.5), -3.0);
    }

    #[test]
    fn respects_operator_precedence() {
        assert_eq!(eval("1 + 2 * 3", 0.0, 0.0), 7.0);
        assert_eq!(eval("(1 + 2) * 3", 0.0, 0.0), 9.0);
        assert_eq!(eval("8 / 4 / 2", 0.0, 0.0), 1.0);
        assert_eq!(eval("10 - 4 - 3", 0.0, 0.0), 3.0);
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_negation() {
        assert_eq!(eval("2^3^2", 0.0, 0.0), 512.0);
        assert_eq!(eval("-x^2", 3.0, 0.0), -9.0);
        assert_eq!(eval("2^-1", 0.0, 0.0), 0.5);
        assert_eq!(eval("-3*x^2*y", 2.0, 0.5), -6.0);
    }

    #[test]
    fn evaluates_named_functions() {
        assert!((eval("sin(x) + cos(y)", 0.0, 0.0) - 1.0).abs() < 1e-12);
        assert!((eval("exp(x)", 1.0, 0.0) - std::f64::consts::E).abs() < 1e-12);
        assert!((eval("log(y)", 0.0, std::f64::consts::E) - 1.0).abs() < 1e-12);
        assert_eq!(eval("sqrt(x*y)", 2.0, 8.0), 4.0);
        assert!((eval("tan(x)", 0.25, 0.0) - 0.25_f64.tan()).abs() < 1e-12);
    }

    #[test]
    fn function_names_do_not_collide_with_variables() {
        assert!((eval("exp(x) + x", 0.0, 0.0) - 1.0).abs() < 1e-12);
        assert!((eval("x*exp(y)", 2.0, 0.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn parses_scientific_notation() {
        assert_eq!(eval("1.5e2 + x", 0.5, 0.0), 150.5);
        assert_eq!(eval("2E-1", 0.0, 0.0), 0.2);
    }

    #[test]
    fn rejects_unknown_symbols() {
        assert_eq!(
            Expression::parse("x + z").unwrap_err(),
            ExpressionError::UnknownSymbol("z".to_string())
        );
        assert_eq!(
            Expression::parse("xy").unwrap_err(),
            ExpressionError::UnknownSymbol("xy".to_string())
        );
        assert_eq!(
            Expression::parse("foo(x)").unwrap_err(),
            ExpressionError::UnknownFunction("foo".to_string())
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(Expression::parse("   ").unwrap_err(), ExpressionError::Empty);
        assert_eq!(Expression::parse("1 +").unwrap_err(), ExpressionError::UnexpectedEnd);
        assert_eq!(
            Expression::parse("(x + 1").unwrap_err(),
            ExpressionError::UnbalancedParentheses
        );
        assert!(matches!(
            Expression::parse("x + 1)").unwrap_err(),
            ExpressionError::UnexpectedToken(_)
        ));
        assert!(matches!(
            Expression::parse("x * * y").unwrap_err(),
            ExpressionError::UnexpectedToken(_)
        ));
        assert_eq!(
            Expression::parse("x # y").unwrap_err(),
            ExpressionError::UnexpectedCharacter { ch: '#', position: 2 }
        );
        assert_eq!(
            Expression::parse("1.2.3").unwrap_err(),
            ExpressionError::InvalidNumber("1.2.3".to_string())
        );
    }

    #[test]
    fn rejects_runaway_nesting() {
        let too_deep = ExpressionError::TooDeep(MAX_DEPTH);
        let parens = format!("{}x{}", "(".repeat(100_000), ")".repeat(100_000));
        assert_eq!(Expression::parse(&parens).unwrap_err(), too_deep);

        let signs = format!("{}x", "-".repeat(200_000));
        assert_eq!(Expression::parse(&signs).unwrap_err(), too_deep);

        let powers = format!("{}x", "x^".repeat(100_000));
        assert_eq!(Expression::parse(&powers).unwrap_err(), too_deep);

        let sum = format!("{}x", "x+".repeat(100_000));
        assert_eq!(Expression::parse(&sum).unwrap_err(), too_deep);

        let product = format!("{}x", "x*".repeat(100_000));
        assert_eq!(Expression::parse(&product).unwrap_err(), too_deep);
    }

    #[test]
    fn moderate_nesting_still_parses() {
        let parens = format!("{}x{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(eval(&parens, 2.5, 0.0), 2.5);

        let signs = format!("{}y", "-".repeat(100));
        assert_eq!(eval(&signs, 0.0, 3.0), 3.0);

        let sum = format!("{}1", "1+".repeat(199));
        assert_eq!(eval(&sum, 0.0, 0.0), 200.0);
    }

    #[test]
    fn non_finite_results_are_errors() {
        let expr = Expression::parse("1 / x").expect("expression should parse");
        let err = expr.eval(0.0, 1.0).unwrap_err();
        assert!(matches!(err, ExpressionError::NonFinite { x, .. } if x == 0.0));

        let expr = Expression::parse("sqrt(y)").expect("expression should parse");
        assert!(matches!(
            expr.eval(0.0, -1.0),
            Err(ExpressionError::NonFinite { .. })
        ));
    }

    #[test]
    fn vm_reports_stack_underflow() {
        let bytecode = Bytecode {
            ops: vec![OpCode::LoadConst(1.0), OpCode::Add],
        };
        let mut stack = Vec::new();
        let result = VM::execute::<f64>(&bytecode, &[0.0, 0.0], &mut stack);
        assert_eq!(
            result.unwrap_err(),
            ExpressionError::MalformedBytecode("stack underflow")
        );
    }

    #[test]
    fn compiles_to_postfix_bytecode() {
        let expr = Expression::parse("x + 2*y").expect("expression should parse");
        assert_eq!(
            expr.bytecode().ops,
            vec![
                OpCode::LoadVar(0),
                OpCode::LoadConst(2.0),
                OpCode::LoadVar(1),
                OpCode::Mul,
                OpCode::Add,
            ]
        );
        assert_eq!(expr.source(), "x + 2*y");
    }

    #[test]
    fn vm_is_generic_over_scalar() {
        let expr = Expression::parse("x*y + 1").expect("expression should parse");
        let mut stack = Vec::new();
        let value = VM::execute::<f32>(expr.bytecode(), &[2.0_f32, 3.0], &mut stack)
            .expect("vm should run");
        assert_eq!(value, 7.0_f32);
    }
}
