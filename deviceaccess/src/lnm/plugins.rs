//! Accessor plugins: an ordered chain of cooked-value decorators on one
//! logical register.

use super::info::PluginSpec;
use super::LogicalNameMappingBackend;
use crate::accessor::{CookedAccess, NDRegisterAccessor};
use crate::data_types::{DataValidity, UserType};
use crate::error::{Error, Result};
use crate::transfer::{AccessorCore, TransferElement, TransferType};
use crate::version_number::VersionNumber;
use std::sync::{Arc, Mutex, Weak};

/// One decorator of the plugin chain, operating on cooked values.
pub trait AccessorPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Target-to-user transformation after a read.
    fn process_on_read(&self, values: &mut [f64]) -> Result<()>;

    /// User-to-target transformation before a write.
    fn process_on_write(&self, values: &mut [f64]) -> Result<()>;

    /// Plugins like `forceReadOnly` veto writes entirely.
    fn blocks_write(&self) -> bool {
        false
    }

    /// Validity contributed by plugin inputs beyond the target register
    /// (e.g. formula parameters); merged into the accessor's validity.
    fn contributed_validity(&self) -> DataValidity {
        DataValidity::Ok
    }
}

/// Scales cooked values by a constant factor.
pub struct MultiplierPlugin {
    factor: f64,
}

impl MultiplierPlugin {
    pub fn from_spec(spec: &PluginSpec) -> Result<Self> {
        let factor = spec
            .parameters
            .get("factor")
            .ok_or_else(|| Error::logic("multiplier plugin: no factor given"))?
            .parse()
            .map_err(|_| Error::logic("multiplier plugin: factor is not a number"))?;
        Ok(MultiplierPlugin { factor })
    }
}

impl AccessorPlugin for MultiplierPlugin {
    fn name(&self) -> &str {
        "multiplier"
    }

    fn process_on_read(&self, values: &mut [f64]) -> Result<()> {
        for value in values {
            *value *= self.factor;
        }
        Ok(())
    }

    fn process_on_write(&self, values: &mut [f64]) -> Result<()> {
        for value in values {
            *value /= self.factor;
        }
        Ok(())
    }
}

/// Forces a writeable target register to be read-only on the logical side.
pub struct ForceReadOnlyPlugin;

impl AccessorPlugin for ForceReadOnlyPlugin {
    fn name(&self) -> &str {
        "forceReadOnly"
    }

    fn process_on_read(&self, _values: &mut [f64]) -> Result<()> {
        Ok(())
    }

    fn process_on_write(&self, _values: &mut [f64]) -> Result<()> {
        Err(Error::logic("this register was forced read-only"))
    }

    fn blocks_write(&self) -> bool {
        true
    }
}

/// Evaluates a formula over `x` (the transferred value) and named LNM
/// VARIABLEs. Written values are remembered so the formula can be
/// re-evaluated when a referenced variable changes.
pub struct MathPlugin {
    formula: Expr,
    parameters: Vec<String>,
    backend: Weak<LogicalNameMappingBackend>,
    last_written: Mutex<Option<Vec<f64>>>,
}

impl MathPlugin {
    pub fn from_spec(
        spec: &PluginSpec,
        backend: &Weak<LogicalNameMappingBackend>,
    ) -> Result<Arc<Self>> {
        let formula_src = spec
            .parameters
            .get("formula")
            .ok_or_else(|| Error::logic("math plugin: no formula given"))?;
        let formula = Expr::parse(formula_src)?;
        let parameters = formula.variable_names();
        Ok(Arc::new(MathPlugin {
            formula,
            parameters,
            backend: backend.clone(),
            last_written: Mutex::new(None),
        }))
    }

    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Values written through the decorated accessor, if any yet.
    pub fn last_written(&self) -> Option<Vec<f64>> {
        self.last_written.lock().unwrap().clone()
    }

    pub fn evaluate(&self, x: &[f64]) -> Result<Vec<f64>> {
        let backend = self
            .backend
            .upgrade()
            .ok_or_else(|| Error::runtime("logical name mapping backend is gone"))?;
        x.iter()
            .map(|value| {
                self.formula
                    .eval(*value, &|name| backend.variable_as_f64(name))
            })
            .collect()
    }
}

impl AccessorPlugin for MathPlugin {
    fn name(&self) -> &str {
        "math"
    }

    fn process_on_read(&self, values: &mut [f64]) -> Result<()> {
        let result = self.evaluate(values)?;
        values.copy_from_slice(&result);
        Ok(())
    }

    fn process_on_write(&self, values: &mut [f64]) -> Result<()> {
        *self.last_written.lock().unwrap() = Some(values.to_vec());
        let result = self.evaluate(values)?;
        values.copy_from_slice(&result);
        Ok(())
    }

    fn contributed_validity(&self) -> DataValidity {
        let Some(backend) = self.backend.upgrade() else {
            return DataValidity::Faulty;
        };
        let mut validity = DataValidity::Ok;
        for parameter in &self.parameters {
            validity = validity.merge(backend.variable_validity(parameter));
        }
        validity
    }
}

/// Applies a plugin chain around an inner accessor, converting the typed
/// buffer through f64 in both directions.
pub struct PluginDecorator<T: UserType> {
    target: Box<dyn NDRegisterAccessor<T>>,
    plugins: Vec<Arc<dyn AccessorPlugin>>,
    buffer: Vec<Vec<T>>,
}

impl<T: UserType> PluginDecorator<T> {
    pub fn new(
        target: Box<dyn NDRegisterAccessor<T>>,
        plugins: Vec<Arc<dyn AccessorPlugin>>,
    ) -> Self {
        let buffer = target.buffer().clone();
        let mut decorator = PluginDecorator {
            target,
            plugins,
            buffer,
        };
        if decorator.plugins.iter().any(|p| p.blocks_write()) {
            decorator.target.core_mut().writeable = false;
        }
        decorator
    }
}

impl<T: UserType> TransferElement for PluginDecorator<T> {
    fn core(&self) -> &AccessorCore {
        self.target.core()
    }

    fn core_mut(&mut self) -> &mut AccessorCore {
        self.target.core_mut()
    }

    fn do_pre_read(&mut self, transfer_type: TransferType) -> Result<()> {
        self.target.do_pre_read(transfer_type)
    }

    fn do_read_transfer_sync(&mut self) -> Result<()> {
        self.target.do_read_transfer_sync()
    }

    fn do_read_transfer_nonblocking(&mut self) -> Result<bool> {
        self.target.do_read_transfer_nonblocking()
    }

    fn do_read_transfer_latest(&mut self) -> Result<bool> {
        self.target.do_read_transfer_latest()
    }

    fn do_post_read(&mut self, transfer_type: TransferType, has_new_data: bool) -> Result<()> {
        self.target.do_post_read(transfer_type, has_new_data)?;
        if !has_new_data {
            return Ok(());
        }
        self.buffer.clone_from(self.target.buffer());
        for row in &mut self.buffer {
            let mut cooked: Vec<f64> = row.iter().map(UserType::to_f64).collect();
            for plugin in &self.plugins {
                plugin.process_on_read(&mut cooked)?;
            }
            for (slot, value) in row.iter_mut().zip(cooked) {
                *slot = T::from_f64(value);
            }
        }
        // faulty plugin inputs make the whole result faulty
        let mut validity = self.target.data_validity();
        for plugin in &self.plugins {
            validity = validity.merge(plugin.contributed_validity());
        }
        self.core_mut().validity = validity;
        Ok(())
    }

    fn do_pre_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        let mut transformed = self.buffer.clone();
        for row in &mut transformed {
            let mut cooked: Vec<f64> = row.iter().map(UserType::to_f64).collect();
            // the chain runs in reverse on the way down to the target
            for plugin in self.plugins.iter().rev() {
                plugin.process_on_write(&mut cooked)?;
            }
            for (slot, value) in row.iter_mut().zip(cooked) {
                *slot = T::from_f64(value);
            }
        }
        self.target.buffer_mut().clone_from(&transformed);
        self.target.do_pre_write(transfer_type, version)
    }

    fn do_write_transfer(&mut self, version: VersionNumber) -> Result<bool> {
        self.target.do_write_transfer(version)
    }

    fn do_post_write(&mut self, transfer_type: TransferType, version: VersionNumber) -> Result<()> {
        self.target.do_post_write(transfer_type, version)
    }
}

impl<T: UserType> NDRegisterAccessor<T> for PluginDecorator<T> {
    fn buffer(&self) -> &Vec<Vec<T>> {
        &self.buffer
    }

    fn buffer_mut(&mut self) -> &mut Vec<Vec<T>> {
        &mut self.buffer
    }

    fn cooked_access(&mut self) -> Option<&mut dyn CookedAccess> {
        None
    }

    fn data_lost_in_queue(&self) -> bool {
        self.target.data_lost_in_queue()
    }
}

// ---------------------------------------------------------------------------
// formula expressions
// ---------------------------------------------------------------------------

/// Parsed arithmetic formula over `x`, named variables, `+ - * /`, unary
/// minus and parentheses.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    X,
    Variable(String),
    Neg(Box<Expr>),
    Add(Box<Expr>, Box<Expr>),
    Sub(Box<Expr>, Box<Expr>),
    Mul(Box<Expr>, Box<Expr>),
    Div(Box<Expr>, Box<Expr>),
}

impl Expr {
    pub fn parse(src: &str) -> Result<Expr> {
        let mut parser = Parser {
            tokens: tokenize(src)?,
            position: 0,
        };
        let expr = parser.expression()?;
        if parser.position != parser.tokens.len() {
            return Err(Error::logic(format!(
                "formula '{src}': unexpected trailing input"
            )));
        }
        Ok(expr)
    }

    /// All variable names referenced by the formula, each once.
    pub fn variable_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut Vec<String>) {
        match self {
            Expr::Variable(name) => {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
            Expr::Neg(inner) => inner.collect_variables(names),
            Expr::Add(a, b) | Expr::Sub(a, b) | Expr::Mul(a, b) | Expr::Div(a, b) => {
                a.collect_variables(names);
                b.collect_variables(names);
            }
            _ => {}
        }
    }

    pub fn eval(&self, x: f64, variables: &dyn Fn(&str) -> Option<f64>) -> Result<f64> {
        Ok(match self {
            Expr::Number(n) => *n,
            Expr::X => x,
            Expr::Variable(name) => variables(name).ok_or_else(|| {
                Error::logic(format!("formula references unknown variable '{name}'"))
            })?,
            Expr::Neg(inner) => -inner.eval(x, variables)?,
            Expr::Add(a, b) => a.eval(x, variables)? + b.eval(x, variables)?,
            Expr::Sub(a, b) => a.eval(x, variables)? - b.eval(x, variables)?,
            Expr::Mul(a, b) => a.eval(x, variables)? * b.eval(x, variables)?,
            Expr::Div(a, b) => a.eval(x, variables)? / b.eval(x, variables)?,
        })
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
    Open,
    Close,
}

fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '(' => {
                chars.next();
                tokens.push(Token::Open);
            }
            ')' => {
                chars.next();
                tokens.push(Token::Close);
            }
            '0'..='9' | '.' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = text
                    .parse()
                    .map_err(|_| Error::logic(format!("formula: bad number '{text}'")))?;
                tokens.push(Token::Number(number));
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&d) = chars.peek() {
                    if d.is_ascii_alphanumeric() || d == '_' {
                        text.push(d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Identifier(text));
            }
            other => {
                return Err(Error::logic(format!(
                    "formula: unexpected character '{other}'"
                )));
            }
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn expression(&mut self) -> Result<Expr> {
        let mut left = self.term()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Plus => {
                    self.next();
                    left = Expr::Add(Box::new(left), Box::new(self.term()?));
                }
                Token::Minus => {
                    self.next();
                    left = Expr::Sub(Box::new(left), Box::new(self.term()?));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut left = self.factor()?;
        while let Some(token) = self.peek() {
            match token {
                Token::Star => {
                    self.next();
                    left = Expr::Mul(Box::new(left), Box::new(self.factor()?));
                }
                Token::Slash => {
                    self.next();
                    left = Expr::Div(Box::new(left), Box::new(self.factor()?));
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<Expr> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if name == "x" {
                    Ok(Expr::X)
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::Open) => {
                let inner = self.expression()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(Error::logic("formula: missing closing parenthesis")),
                }
            }
            other => Err(Error::logic(format!(
                "formula: unexpected token {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_vars(_: &str) -> Option<f64> {
        None
    }

    #[test]
    fn test_expression_precedence() {
        let e = Expr::parse("1 + 2 * 3").unwrap();
        assert_eq!(e.eval(0.0, &no_vars).unwrap(), 7.0);
        let e = Expr::parse("(1 + 2) * 3").unwrap();
        assert_eq!(e.eval(0.0, &no_vars).unwrap(), 9.0);
    }

    #[test]
    fn test_expression_with_x_and_vars() {
        let e = Expr::parse("x * scale + offset").unwrap();
        assert_eq!(e.variable_names(), vec!["scale", "offset"]);
        let vars = |name: &str| match name {
            "scale" => Some(2.0),
            "offset" => Some(-1.0),
            _ => None,
        };
        assert_eq!(e.eval(10.0, &vars).unwrap(), 19.0);
    }

    #[test]
    fn test_unary_minus() {
        let e = Expr::parse("-x + 1").unwrap();
        assert_eq!(e.eval(4.0, &no_vars).unwrap(), -3.0);
    }

    #[test]
    fn test_parse_errors() {
        assert!(Expr::parse("1 +").is_err());
        assert!(Expr::parse("(1").is_err());
        assert!(Expr::parse("1 $ 2").is_err());
        assert!(Expr::parse("x y").is_err());
    }

    #[test]
    fn test_unknown_variable_fails_eval() {
        let e = Expr::parse("x + missing").unwrap();
        assert!(e.eval(0.0, &no_vars).unwrap_err().is_logic());
    }
}
