/// Classification flag varnishstat attaches to each counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterFlag {
    /// `c`, and `a` in 3.x output.
    Counter,
    /// `g`
    Gauge,
    /// `b`, a bit-encoded probe history.
    Bitmap,
    /// `i`
    Info,
    Unknown,
}

impl CounterFlag {
    pub fn from_flag(flag: &str) -> Self {
        match flag {
            "c" | "a" => Self::Counter,
            "g" => Self::Gauge,
            "b" => Self::Bitmap,
            "i" => Self::Info,
            _ => Self::Unknown,
        }
    }
}

/// One counter from a single varnishstat dump.
#[derive(Debug, Clone, PartialEq)]
pub struct RawCounter {
    pub name: String,
    pub value: f64,
    /// The exact integer value when the dump carried one; bitmaps need every
    /// bit and `f64` only holds 53 of them.
    pub integer: Option<u64>,
    pub description: String,
    pub identifier: String,
    pub flag: CounterFlag,
}

impl RawCounter {
    pub fn new(name: impl Into<String>, value: f64, flag: CounterFlag) -> Self {
        Self {
            name: name.into(),
            value,
            integer: None,
            description: String::new(),
            identifier: String::new(),
            flag,
        }
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_integer(mut self, integer: u64) -> Self {
        self.integer = Some(integer);
        self
    }

    /// Integer view of the value, exact when the dump provided an integer.
    pub fn bits(&self) -> u64 {
        self.integer.unwrap_or(self.value as u64)
    }
}
