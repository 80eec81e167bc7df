//! Per-locus likelihood buffers: tip-state encoding, conditional-likelihood
//! vectors (CLVs), scale buffers, and the transition-probability matrices
//! that the embedded gene tree's branches index into. Grounded on the
//! buffer layout in `init_locus`/`dealloc_locus_data` and the tip-encoding
//! routines `create_charmap`/`set_tipchars_4x4`/`set_tipstates` in the
//! original locus module.
//!
//! Field declaration order here doubles as the teardown order the original
//! enforced by hand (`dealloc_locus_data` frees `rates` first and
//! `frequencies` last): Rust drops struct fields in declaration order, so
//! that invariant is automatic rather than asserted.

use crate::eigen::{self, EigenDecomposition};
use crate::pmatrix;
use crate::tiptip::{self, TipCodeTable, TipTipMode};
use bpp_error::{BppError, BppResult};

/// 4-bit IUPAC nucleotide ambiguity code: bit 0 = A, bit 1 = C, bit 2 = G,
/// bit 3 = T/U. A code of `0` means "unrecognized character" and is
/// rejected by [`build_charmap`]'s caller.
pub type CharCode = u8;

const FULLY_AMBIGUOUS: CharCode = 0b1111;

/// Builds the ASCII → 4-bit ambiguity-code table used to encode tip
/// sequences (`create_charmap` in the original). Ambiguity codes cover the
/// standard IUPAC nucleotide alphabet; gaps, `N`, and `?` map to "any
/// base". Unrecognized bytes map to `0`.
pub fn build_charmap() -> [CharCode; 256] {
    let mut map = [0u8; 256];
    let pairs: &[(u8, CharCode)] = &[
        (b'A', 0b0001),
        (b'C', 0b0010),
        (b'G', 0b0100),
        (b'T', 0b1000),
        (b'U', 0b1000),
        (b'R', 0b0101), // A|G
        (b'Y', 0b1010), // C|T
        (b'S', 0b0110), // G|C
        (b'W', 0b1001), // A|T
        (b'K', 0b1100), // G|T
        (b'M', 0b0011), // A|C
        (b'B', 0b1110), // C|G|T
        (b'D', 0b1101), // A|G|T
        (b'H', 0b1011), // A|C|T
        (b'V', 0b0111), // A|C|G
        (b'N', FULLY_AMBIGUOUS),
        (b'?', FULLY_AMBIGUOUS),
        (b'-', FULLY_AMBIGUOUS),
    ];
    for &(upper, code) in pairs {
        map[upper as usize] = code;
        map[upper.to_ascii_lowercase() as usize] = code;
    }
    map
}

/// Expands a 4-bit ambiguity code into a length-4 partial-likelihood
/// vector: `1.0` at each base the code is consistent with, `0.0`
/// elsewhere. A fully ambiguous tip (`N`, `-`) is the all-ones vector,
/// matching a tip CLV that imposes no constraint on the reconstruction.
pub fn code_to_partials(code: CharCode) -> [f64; 4] {
    [
        (code & 0b0001 != 0) as u8 as f64,
        (code & 0b0010 != 0) as u8 as f64,
        (code & 0b0100 != 0) as u8 as f64,
        (code & 0b1000 != 0) as u8 as f64,
    ]
}

pub struct LocusPartition {
    pub states: usize,
    pub tip_count: usize,
    pub inner_count: usize,
    pub pattern_count: usize,
    pub rate_cats: usize,

    pub charmap: [CharCode; 256],
    /// `[tip][pattern]`, one ambiguity code per site pattern per tip.
    pub tipchars: Vec<Vec<CharCode>>,
    /// `[inner node][pattern * states * rate_cats]`, indexed by
    /// `clv_index - tip_count` (tips are encoded via `tipchars`, not a CLV,
    /// following the original's pattern-tip optimization).
    pub clv: Vec<Vec<f64>>,
    /// `[inner node][pattern]`, per-pattern log-scale counters.
    pub scale_buffer: Vec<Vec<i32>>,
    /// `[pmatrix_index][rate_cat * states * states]`.
    pub pmatrix: Vec<Vec<f64>>,

    pub pattern_weights: Vec<f64>,
    pub rates: Vec<f64>,
    pub rate_weights: Vec<f64>,

    pub subst_params: Vec<f64>,
    pub frequencies: Vec<f64>,
    pub eigen: Option<EigenDecomposition>,
    pub eigen_decomp_valid: bool,

    /// `None` until [`Self::enable_pattern_tip`] is called; a compile-time
    /// attribute in the original, modeled here as an opt-in runtime switch
    /// so both tip-encoding strategies can be exercised from one binary.
    pub pattern_tip: Option<TipCodeTable>,
}

impl LocusPartition {
    pub fn new(
        states: usize,
        tip_count: usize,
        inner_count: usize,
        pattern_count: usize,
        rate_cats: usize,
    ) -> Self {
        LocusPartition {
            states,
            tip_count,
            inner_count,
            pattern_count,
            rate_cats,
            charmap: build_charmap(),
            tipchars: vec![Vec::new(); tip_count],
            clv: vec![vec![0.0; pattern_count * states * rate_cats]; inner_count],
            scale_buffer: vec![vec![0; pattern_count]; inner_count],
            pmatrix: vec![vec![0.0; states * states * rate_cats]; tip_count + inner_count],
            pattern_weights: vec![1.0; pattern_count],
            rates: vec![1.0; rate_cats],
            rate_weights: vec![1.0 / rate_cats as f64; rate_cats],
            subst_params: vec![1.0; states * (states - 1) / 2],
            frequencies: vec![1.0 / states as f64; states],
            eigen: None,
            eigen_decomp_valid: false,
            pattern_tip: None,
        }
    }

    /// Switches this locus into pattern-tip mode: tip sequences are
    /// registered into a growable `charmap`/`tipmap` code table instead of
    /// expanded into CLVs. Idempotent.
    pub fn enable_pattern_tip(&mut self) {
        self.pattern_tip.get_or_insert_with(TipCodeTable::new);
    }

    /// This locus's tip-tip table layout, meaningful only once
    /// [`Self::enable_pattern_tip`] has been called.
    pub fn tip_tip_mode(&self) -> TipTipMode {
        tiptip::tip_tip_mode(self.states)
    }

    /// Registers `tip`'s sequence into the pattern-tip code table, one
    /// dense code per site, returning those codes. Requires
    /// [`Self::enable_pattern_tip`] to have been called first.
    pub fn register_pattern_tip_sequence(
        &mut self,
        tip: usize,
        sequence: &[u8],
    ) -> BppResult<Vec<usize>> {
        let charmap = self.charmap;
        let table = self.pattern_tip.as_mut().ok_or_else(|| {
            BppError::semantic(
                bpp_error::Provenance::none(),
                "pattern-tip mode is not enabled for this locus",
            )
        })?;
        if sequence.len() != self.pattern_count {
            return Err(BppError::resource(format!(
                "tip {tip} sequence has {} sites, expected {}",
                sequence.len(),
                self.pattern_count
            )));
        }
        sequence
            .iter()
            .map(|&b| {
                let bitset = charmap[b as usize];
                if bitset == 0 {
                    return Err(BppError::semantic(
                        bpp_error::Provenance::none(),
                        format!("unrecognized character '{}' in tip sequence", b as char),
                    ));
                }
                table.register(bitset)
            })
            .collect()
    }

    /// Builds the precomputed per-pair CLV table for a cherry of two tips
    /// whose branches resolve to `pmatrix_a`/`pmatrix_b` (one rate
    /// category's `states * states` block each).
    pub fn cherry_table(&self, pmatrix_a: &[f64], pmatrix_b: &[f64]) -> BppResult<Vec<f64>> {
        let table = self.pattern_tip.as_ref().ok_or_else(|| {
            BppError::semantic(
                bpp_error::Provenance::none(),
                "pattern-tip mode is not enabled for this locus",
            )
        })?;
        tiptip::build_cherry_table(table, pmatrix_a, pmatrix_b, self.states)
    }

    /// Encodes one tip's aligned sequence into ambiguity codes
    /// (`set_tipchars_4x4`/`set_tipstates`). `sequence` must have exactly
    /// `pattern_count` bytes.
    pub fn set_tip_sequence(&mut self, tip: usize, sequence: &[u8]) -> BppResult<()> {
        if sequence.len() != self.pattern_count {
            return Err(BppError::resource(format!(
                "tip {tip} sequence has {} sites, expected {}",
                sequence.len(),
                self.pattern_count
            )));
        }
        let codes: Vec<CharCode> = sequence
            .iter()
            .map(|&b| self.charmap[b as usize])
            .collect();
        if let Some(&bad) = sequence.iter().zip(&codes).find(|(_, &c)| c == 0).map(|(b, _)| b) {
            return Err(BppError::semantic(
                bpp_error::Provenance::none(),
                format!("unrecognized character '{}' in tip sequence", bad as char),
            ));
        }
        self.tipchars[tip] = codes;
        Ok(())
    }

    pub fn set_frequencies(&mut self, frequencies: Vec<f64>) -> BppResult<()> {
        if frequencies.len() != self.states {
            return Err(BppError::resource("frequency vector length mismatch"));
        }
        self.frequencies = frequencies;
        self.eigen_decomp_valid = false;
        Ok(())
    }

    pub fn set_subst_params(&mut self, params: Vec<f64>) -> BppResult<()> {
        let expected = self.states * (self.states - 1) / 2;
        if params.len() != expected {
            return Err(BppError::resource(format!(
                "substitution parameter vector has {} entries, expected {expected}",
                params.len()
            )));
        }
        self.subst_params = params;
        self.eigen_decomp_valid = false;
        Ok(())
    }

    /// Recomputes the eigendecomposition if invalidated by a parameter
    /// change. A no-op (and cheap) if nothing changed since the last call.
    pub fn ensure_eigen(&mut self) -> BppResult<()> {
        if self.eigen_decomp_valid {
            return Ok(());
        }
        let eig = eigen::compute_eigen(&self.subst_params, &self.frequencies, self.states)?;
        self.eigen = Some(eig);
        self.eigen_decomp_valid = true;
        Ok(())
    }

    /// Whether this partition's current substitution parameters describe
    /// plain JC69 (equal frequencies, equal exchangeabilities), in which
    /// case [`Self::update_pmatrix`] takes the closed-form fast path.
    pub fn is_jc69(&self) -> bool {
        self.states == 4
            && self.frequencies.iter().all(|&f| (f - 0.25).abs() < 1e-12)
            && self.subst_params.iter().all(|&p| (p - self.subst_params[0]).abs() < 1e-12)
    }

    /// Recomputes the `pmatrix_index`-th transition matrix for a branch of
    /// the given length, across every rate category.
    pub fn update_pmatrix(&mut self, pmatrix_index: usize, branch_length: f64) -> BppResult<()> {
        let jc69 = self.is_jc69();
        if !jc69 {
            self.ensure_eigen()?;
        }
        let n2 = self.states * self.states;
        for rate_cat in 0..self.rate_cats {
            let rate = self.rates[rate_cat];
            let block = if jc69 {
                pmatrix::jc69_pmatrix(rate * branch_length)
            } else {
                pmatrix::general_pmatrix(
                    self.eigen.as_ref().expect("ensure_eigen populated this"),
                    rate,
                    branch_length,
                )
            };
            self.pmatrix[pmatrix_index][rate_cat * n2..(rate_cat + 1) * n2].copy_from_slice(&block);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charmap_resolves_ambiguity_codes() {
        let map = build_charmap();
        assert_eq!(map[b'A' as usize], 0b0001);
        assert_eq!(map[b'n' as usize], FULLY_AMBIGUOUS);
        assert_eq!(map[b'R' as usize], 0b0101);
        assert_eq!(map[b'x' as usize], 0);
    }

    #[test]
    fn code_to_partials_is_all_ones_for_gap() {
        assert_eq!(code_to_partials(FULLY_AMBIGUOUS), [1.0, 1.0, 1.0, 1.0]);
        assert_eq!(code_to_partials(0b0001), [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn set_tip_sequence_rejects_wrong_length() {
        let mut locus = LocusPartition::new(4, 2, 1, 5, 1);
        assert!(locus.set_tip_sequence(0, b"ACG").is_err());
    }

    #[test]
    fn update_pmatrix_uses_jc69_fast_path_by_default() {
        let mut locus = LocusPartition::new(4, 2, 1, 5, 1);
        locus.update_pmatrix(0, 0.3).unwrap();
        let expected = pmatrix::jc69_pmatrix(0.3);
        assert_eq!(locus.pmatrix[0], expected);
    }

    #[test]
    fn update_pmatrix_uses_general_path_after_param_change() {
        let mut locus = LocusPartition::new(4, 2, 1, 5, 1);
        locus
            .set_subst_params(vec![1.0, 2.0, 0.5, 1.5, 3.0, 1.0])
            .unwrap();
        locus.set_frequencies(vec![0.1, 0.2, 0.3, 0.4]).unwrap();
        assert!(!locus.is_jc69());
        locus.update_pmatrix(0, 0.3).unwrap();
        let sum: f64 = locus.pmatrix[0][0..4].iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }

    #[test]
    fn pattern_tip_requires_enabling_first() {
        let mut locus = LocusPartition::new(4, 2, 1, 3, 1);
        assert!(locus.register_pattern_tip_sequence(0, b"ACG").is_err());
        locus.enable_pattern_tip();
        let codes = locus.register_pattern_tip_sequence(0, b"ACG").unwrap();
        assert_eq!(codes.len(), 3);
    }

    #[test]
    fn pattern_tip_cherry_table_agrees_with_direct_clv_path() {
        let mut locus = LocusPartition::new(4, 2, 1, 1, 1);
        locus.enable_pattern_tip();
        locus.register_pattern_tip_sequence(0, b"A").unwrap();
        locus.register_pattern_tip_sequence(1, b"C").unwrap();

        let pmatrix_a = pmatrix::jc69_pmatrix(0.1);
        let pmatrix_b = pmatrix::jc69_pmatrix(0.2);
        let table = locus.cherry_table(&pmatrix_a, &pmatrix_b).unwrap();

        locus.set_tip_sequence(0, b"A").unwrap();
        locus.set_tip_sequence(1, b"C").unwrap();
        let partials_a = code_to_partials(locus.tipchars[0][0]);
        let partials_b = code_to_partials(locus.tipchars[1][0]);

        let mut direct = [0.0; 4];
        for s in 0..4 {
            let msg_a: f64 = (0..4).map(|k| pmatrix_a[s * 4 + k] * partials_a[k]).sum();
            let msg_b: f64 = (0..4).map(|k| pmatrix_b[s * 4 + k] * partials_b[k]).sum();
            direct[s] = msg_a * msg_b;
        }

        let code_table = locus.pattern_tip.as_ref().unwrap();
        let code_a = code_table.code_of(locus.charmap[b'A' as usize]).unwrap();
        let code_b = code_table.code_of(locus.charmap[b'C' as usize]).unwrap();
        let n = code_table.len();
        let base = (code_a * n + code_b) * 4;
        for s in 0..4 {
            assert!((table[base + s] - direct[s]).abs() < 1e-12);
        }
    }
}
