//! Named definitions and the gas budget.

use std::collections::HashMap;

use crate::dsl::ast::{LocalConfiguration, Stackable};
use crate::dsl::error::CompileError;

pub const DEFAULT_GAS: u64 = 100_000;

/// Emoji shortcuts available without a declaration: General MIDI programs.
const BUILTIN_EMOJIS: &[(&str, &str)] = &[
    ("🎹", "0"),
    ("🔔", "14"),
    ("🪗", "21"),
    ("🎸", "24"),
    ("🎻", "40"),
    ("🎤", "52"),
    ("🎺", "56"),
    ("🎷", "65"),
    ("🪈", "73"),
    ("🪕", "105"),
    ("🥁", "118"),
];

/// Groups, user-defined ranges and emoji shortcuts.
#[derive(Debug, Clone)]
pub struct Registry {
    groups: HashMap<u32, Vec<Stackable>>,
    udrs: HashMap<String, Vec<Stackable>>,
    emojis: HashMap<String, LocalConfiguration>,
}

impl Default for Registry {
    fn default() -> Self {
        let emojis = BUILTIN_EMOJIS
            .iter()
            .map(|&(symbol, program)| {
                (
                    symbol.to_string(),
                    LocalConfiguration {
                        offset: 0,
                        key: "p".into(),
                        value: program.into(),
                    },
                )
            })
            .collect();
        Self {
            groups: HashMap::new(),
            udrs: HashMap::new(),
            emojis,
        }
    }
}

impl Registry {
    pub fn declare_group(
        &mut self,
        key: u32,
        body: &[Stackable],
        offset: usize,
    ) -> Result<(), CompileError> {
        if self.groups.contains_key(&key) {
            return Err(CompileError::semantic(
                format!("Already declared group: {key}"),
                offset,
            ));
        }
        self.groups.insert(key, body.to_vec());
        Ok(())
    }

    pub fn group(&self, key: u32, offset: usize) -> Result<&[Stackable], CompileError> {
        self.groups
            .get(&key)
            .map(Vec::as_slice)
            .ok_or_else(|| CompileError::semantic(format!("No such group: {key}"), offset))
    }

    pub fn define_udr(
        &mut self,
        name: &str,
        body: &[Stackable],
        offset: usize,
    ) -> Result<(), CompileError> {
        if self.udrs.contains_key(name) {
            return Err(CompileError::semantic(
                format!("Already defined UDR: {name}"),
                offset,
            ));
        }
        self.udrs.insert(name.to_string(), body.to_vec());
        Ok(())
    }

    pub fn udr(&self, name: &str, offset: usize) -> Result<&[Stackable], CompileError> {
        self.udrs
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| CompileError::semantic(format!("No such UDR: {name}"), offset))
    }

    pub fn declare_emoji(
        &mut self,
        symbol: &str,
        value: &LocalConfiguration,
        offset: usize,
    ) -> Result<(), CompileError> {
        if self.emojis.contains_key(symbol) {
            return Err(CompileError::semantic(
                format!("Already declared emoji: {symbol}"),
                offset,
            ));
        }
        self.emojis.insert(symbol.to_string(), value.clone());
        Ok(())
    }

    pub fn emoji(&self, symbol: &str, offset: usize) -> Result<&LocalConfiguration, CompileError> {
        self.emojis
            .get(symbol)
            .ok_or_else(|| CompileError::semantic(format!("No such emoji: {symbol}"), offset))
    }
}

/// Work budget. Each processed node burns one unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gas {
    remaining: u64,
}

impl Gas {
    pub fn new(budget: u64) -> Self {
        Self { remaining: budget }
    }

    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn consume(&mut self, offset: usize) -> Result<(), CompileError> {
        self.remaining = self.remaining.saturating_sub(1);
        if self.remaining == 0 {
            return Err(CompileError::exhausted(offset));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::ast::StackableKind;

    fn rest() -> Vec<Stackable> {
        vec![Stackable {
            offset: 0,
            kind: StackableKind::Rest,
        }]
    }

    #[test]
    fn group_lookup() {
        let mut r = Registry::default();
        r.declare_group(1, &rest(), 0).unwrap();
        assert_eq!(r.group(1, 5).unwrap().len(), 1);
        let err = r.group(2, 7).unwrap_err();
        assert_eq!(err.message, "No such group: 2");
        assert_eq!(err.offset, 7);
    }

    #[test]
    fn group_redeclaration_rejected() {
        let mut r = Registry::default();
        r.declare_group(1, &rest(), 0).unwrap();
        assert!(r.declare_group(1, &rest(), 3).is_err());
    }

    #[test]
    fn udr_lookup() {
        let mut r = Registry::default();
        r.define_udr("up", &rest(), 0).unwrap();
        assert!(r.udr("up", 0).is_ok());
        assert_eq!(r.udr("down", 4).unwrap_err().message, "No such UDR: down");
        assert!(r.define_udr("up", &rest(), 9).is_err());
    }

    #[test]
    fn builtin_emojis() {
        let r = Registry::default();
        let violin = r.emoji("🎻", 0).unwrap();
        assert_eq!(violin.key, "p");
        assert_eq!(violin.value, "40");
    }

    #[test]
    fn builtin_emoji_cannot_be_redeclared() {
        let mut r = Registry::default();
        let value = LocalConfiguration {
            offset: 0,
            key: "v".into(),
            value: "100".into(),
        };
        assert!(r.declare_emoji("🎹", &value, 0).is_err());
        r.declare_emoji("🐸", &value, 0).unwrap();
        assert_eq!(r.emoji("🐸", 0).unwrap().value, "100");
    }

    #[test]
    fn gas_runs_out() {
        let mut gas = Gas::new(3);
        assert!(gas.consume(0).is_ok());
        assert!(gas.consume(1).is_ok());
        let err = gas.consume(2).unwrap_err();
        assert_eq!(err.message, "Not enough gas");
        assert_eq!(err.offset, 2);
    }
}
