/// Parsed formula.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Text(String),
    Bool(bool),
    Null,
    Undefined,
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Call {
        function: Function,
        args: Vec<Expr>,
    },
    Length(Box<Expr>),
    Includes {
        target: Box<Expr>,
        needle: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Remainder,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Whitelisted helpers callable from formulas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Age,
    ParseDate,
    DiffDays,
    Round,
    Floor,
    Ceil,
    Abs,
    Min,
    Max,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "age" => Some(Function::Age),
            "parseDate" => Some(Function::ParseDate),
            "diffDays" => Some(Function::DiffDays),
            "Math.round" => Some(Function::Round),
            "Math.floor" => Some(Function::Floor),
            "Math.ceil" => Some(Function::Ceil),
            "Math.abs" => Some(Function::Abs),
            "Math.min" => Some(Function::Min),
            "Math.max" => Some(Function::Max),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Function::Age => "age",
            Function::ParseDate => "parseDate",
            Function::DiffDays => "diffDays",
            Function::Round => "Math.round",
            Function::Floor => "Math.floor",
            Function::Ceil => "Math.ceil",
            Function::Abs => "Math.abs",
            Function::Min => "Math.min",
            Function::Max => "Math.max",
        }
    }

    /// Accepted argument counts as `(min, max)`; `None` means unbounded.
    pub fn arity(&self) -> (usize, Option<usize>) {
        match self {
            Function::Age | Function::ParseDate => (1, Some(1)),
            Function::DiffDays => (2, Some(2)),
            Function::Round | Function::Floor | Function::Ceil | Function::Abs => (1, Some(1)),
            Function::Min | Function::Max => (0, None),
        }
    }
}
