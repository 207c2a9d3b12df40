use crate::core::errors::AssignmentError;
use crate::core::utils::{bits_to_string, to_hex};
use crate::core::{PolarizationMap, Symbol};

/// Raw key material: one value bit and one basis bit per decoded symbol.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawKey {
    pub symbols: Vec<Symbol>,
    pub key_bits: Vec<bool>,
    pub basis_bits: Vec<bool>,
}

impl RawKey {
    /// Derives both bit strings from polarizations. Noise symbols are skipped.
    pub fn from_symbols<I>(symbols: I) -> Self
    where
        I: IntoIterator<Item = Symbol>,
    {
        let mut raw = RawKey::default();
        for symbol in symbols {
            if let (Some(value), Some(basis)) = (symbol.value_bit(), symbol.basis_bit()) {
                raw.symbols.push(symbol);
                raw.key_bits.push(value);
                raw.basis_bits.push(basis);
            }
        }
        raw
    }

    /// Rebuilds symbols from bit pairs (ordinal = 2 * basis + value).
    ///
    /// Extra bits in the longer slice are ignored.
    pub fn from_bits(key_bits: &[bool], basis_bits: &[bool]) -> Self {
        Self::from_symbols(
            key_bits
                .iter()
                .zip(basis_bits)
                .filter_map(|(&v, &b)| Symbol::from_ordinal(2 * b as u8 + v as u8)),
        )
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Symbols as letters, e.g. `"HDVA"`.
    pub fn symbol_string(&self) -> String {
        self.symbols.iter().map(|s| s.letter()).collect()
    }

    pub fn key_string(&self) -> String {
        bits_to_string(&self.key_bits)
    }

    pub fn basis_string(&self) -> String {
        bits_to_string(&self.basis_bits)
    }

    pub fn key_hex(&self) -> String {
        to_hex(&self.key_bits, 0)
    }

    pub fn basis_hex(&self) -> String {
        to_hex(&self.basis_bits, 0)
    }
}

/// Maps a decoded run of cluster ids through the operator's polarization map.
pub fn assemble<I>(run: I, map: &PolarizationMap) -> Result<RawKey, AssignmentError>
where
    I: IntoIterator<Item = usize>,
{
    let symbols = run
        .into_iter()
        .map(|cluster| match map.get(cluster) {
            None => Err(AssignmentError::Unmapped(cluster)),
            Some(Symbol::Noise) => Err(AssignmentError::NoiseInRun(cluster)),
            Some(symbol) => Ok(symbol),
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RawKey::from_symbols(symbols))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_clusters_to_bit_pairs() {
        let map = PolarizationMap::parse("NHDVA").unwrap();
        let raw = assemble(vec![1, 2, 3, 4, 2], &map).unwrap();
        assert_eq!(raw.symbol_string(), "HDVAD");
        assert_eq!(raw.key_string(), "01011");
        assert_eq!(raw.basis_string(), "00110");
    }

    #[test]
    fn unmapped_cluster_fails() {
        let map = PolarizationMap::parse("NHDVA").unwrap();
        assert_eq!(
            assemble(vec![1, 5], &map).unwrap_err(),
            AssignmentError::Unmapped(5)
        );
    }

    #[test]
    fn noise_cluster_in_run_fails() {
        let map = PolarizationMap::parse("HNDVA").unwrap();
        assert_eq!(
            assemble(vec![0, 1], &map).unwrap_err(),
            AssignmentError::NoiseInRun(1)
        );
    }

    #[test]
    fn from_bits_inverts_ordinals() {
        let raw = RawKey::from_bits(&[false, true, false, true], &[false, false, true, true]);
        assert_eq!(raw.symbol_string(), "HDVA");
        assert_eq!(raw.key_hex(), "5");
        assert_eq!(raw.basis_hex(), "3");
    }
}
