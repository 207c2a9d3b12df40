use crate::core::errors::AssignmentError;
use std::fmt;

/// A decoded polarization, or the background level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Symbol {
    H,
    D,
    V,
    A,
    Noise,
}

impl Symbol {
    pub const POLARIZATIONS: [Symbol; 4] = [Symbol::H, Symbol::D, Symbol::V, Symbol::A];

    /// Position in the H, D, V, A ordering. `None` for noise.
    pub fn ordinal(self) -> Option<u8> {
        match self {
            Symbol::H => Some(0),
            Symbol::D => Some(1),
            Symbol::V => Some(2),
            Symbol::A => Some(3),
            Symbol::Noise => None,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Symbol> {
        Self::POLARIZATIONS.get(ordinal as usize).copied()
    }

    /// Basis bit: set for V and A.
    pub fn basis_bit(self) -> Option<bool> {
        self.ordinal().map(|o| o >= 2)
    }

    /// Value bit: the low bit of the ordinal.
    pub fn value_bit(self) -> Option<bool> {
        self.ordinal().map(|o| o % 2 == 1)
    }

    pub fn letter(self) -> char {
        match self {
            Symbol::H => 'H',
            Symbol::D => 'D',
            Symbol::V => 'V',
            Symbol::A => 'A',
            Symbol::Noise => 'N',
        }
    }

    pub fn from_letter(c: char) -> Result<Symbol, AssignmentError> {
        match c.to_ascii_uppercase() {
            'H' => Ok(Symbol::H),
            'D' => Ok(Symbol::D),
            'V' => Ok(Symbol::V),
            'A' => Ok(Symbol::A),
            'N' => Ok(Symbol::Noise),
            _ => Err(AssignmentError::UnknownLetter(c)),
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Operator-declared bijection from cluster id to symbol.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolarizationMap {
    symbols: Vec<Symbol>,
}

impl PolarizationMap {
    /// Validates that exactly one cluster is noise and no polarization is
    /// used twice.
    pub fn new(symbols: Vec<Symbol>) -> Result<Self, AssignmentError> {
        let noise = symbols.iter().filter(|&&s| s == Symbol::Noise).count();
        if noise != 1 {
            return Err(AssignmentError::NoiseCount(noise));
        }

        for (second, symbol) in symbols.iter().enumerate() {
            if *symbol == Symbol::Noise {
                continue;
            }
            if let Some(first) = symbols[..second].iter().position(|s| s == symbol) {
                return Err(AssignmentError::Ambiguous {
                    symbol: symbol.letter(),
                    first,
                    second,
                });
            }
        }

        Ok(Self { symbols })
    }

    /// Parses one letter per cluster in id order, e.g. `"NHDVA"`.
    pub fn parse(text: &str) -> Result<Self, AssignmentError> {
        let symbols = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(Symbol::from_letter)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(symbols)
    }

    /// Builds the map from the calibration form, which names a cluster letter
    /// (`A` for cluster 0, `B` for 1, ...) for H, D, V, A and noise, in that
    /// order.
    pub fn from_cluster_letters(letters: [char; 5]) -> Result<Self, AssignmentError> {
        let order = [Symbol::H, Symbol::D, Symbol::V, Symbol::A, Symbol::Noise];
        let mut slots: Vec<Option<Symbol>> = vec![None; letters.len()];

        for (&letter, symbol) in letters.iter().zip(order) {
            let upper = letter.to_ascii_uppercase();
            if !upper.is_ascii_uppercase() || (upper as usize - 'A' as usize) >= slots.len() {
                return Err(AssignmentError::UnknownLetter(letter));
            }
            let cluster = upper as usize - 'A' as usize;
            if let Some(previous) = slots[cluster] {
                let first = order.iter().position(|&s| s == previous).unwrap_or(0);
                return Err(AssignmentError::Ambiguous {
                    symbol: upper,
                    first,
                    second: order.iter().position(|&s| s == symbol).unwrap_or(0),
                });
            }
            slots[cluster] = Some(symbol);
        }

        let symbols = slots
            .into_iter()
            .enumerate()
            .map(|(cluster, slot)| slot.ok_or(AssignmentError::Unmapped(cluster)))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(symbols)
    }

    pub fn get(&self, cluster: usize) -> Option<Symbol> {
        self.symbols.get(cluster).copied()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Cluster id declared as noise.
    pub fn noise_cluster(&self) -> usize {
        self.symbols
            .iter()
            .position(|&s| s == Symbol::Noise)
            .unwrap_or(0)
    }
}
