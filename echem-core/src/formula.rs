//! Chemical formulas and elemental composition.
//!
//! Accepts nested groups (`Ca3(PO4)2`, `K4[Fe(CN)6]`), fractional counts (`Ni0.8Fe0.2OOH`) and
//! hydrates separated by `·` or `*` between a formula and a leading multiplier
//! (`CuSO4·5H2O`). A `.` is always a decimal point.

use crate::error::EchemError;
use echem_schemas::sample::ElementFraction;
use indexmap::IndexMap;

const ELEMENTS: [&str; 118] = [
    "H", "He", "Li", "Be", "B", "C", "N", "O", "F", "Ne", "Na", "Mg", "Al", "Si", "P", "S", "Cl",
    "Ar", "K", "Ca", "Sc", "Ti", "V", "Cr", "Mn", "Fe", "Co", "Ni", "Cu", "Zn", "Ga", "Ge", "As",
    "Se", "Br", "Kr", "Rb", "Sr", "Y", "Zr", "Nb", "Mo", "Tc", "Ru", "Rh", "Pd", "Ag", "Cd", "In",
    "Sn", "Sb", "Te", "I", "Xe", "Cs", "Ba", "La", "Ce", "Pr", "Nd", "Pm", "Sm", "Eu", "Gd", "Tb",
    "Dy", "Ho", "Er", "Tm", "Yb", "Lu", "Hf", "Ta", "W", "Re", "Os", "Ir", "Pt", "Au", "Hg", "Tl",
    "Pb", "Bi", "Po", "At", "Rn", "Fr", "Ra", "Ac", "Th", "Pa", "U", "Np", "Pu", "Am", "Cm", "Bk",
    "Cf", "Es", "Fm", "Md", "No", "Lr", "Rf", "Db", "Sg", "Bh", "Hs", "Mt", "Ds", "Rg", "Cn", "Nh",
    "Fl", "Mc", "Lv", "Ts", "Og",
];

pub fn is_element(symbol: &str) -> bool {
    ELEMENTS.contains(&symbol)
}

/// Element counts in order of first appearance.
pub type Composition = IndexMap<String, f64>;

struct Parser<'a> {
    formula: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn error(&self, reason: &str) -> EchemError {
        EchemError::schema("formula", format!("'{}' at position {}: {}", self.formula, self.pos, reason))
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn number(&mut self) -> Option<f64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.pos += 1;
        }
        if start == self.pos {
            return None;
        }
        self.chars[start..self.pos].iter().collect::<String>().parse().ok()
    }

    fn symbol(&mut self) -> Result<String, EchemError> {
        let mut symbol = String::new();
        if let Some(c) = self.peek().filter(char::is_ascii_uppercase) {
            symbol.push(c);
            self.pos += 1;
        }
        while let Some(c) = self.peek().filter(char::is_ascii_lowercase) {
            symbol.push(c);
            self.pos += 1;
        }
        if is_element(&symbol) {
            Ok(symbol)
        } else {
            Err(self.error(&format!("unknown element '{symbol}'")))
        }
    }

    /// Parses until `close` (or the end for `None`).
    fn group(&mut self, close: Option<char>) -> Result<Composition, EchemError> {
        let mut counts = Composition::new();
        loop {
            match self.peek() {
                None if close.is_none() => return Ok(counts),
                None => return Err(self.error("unbalanced bracket")),
                Some(c) if Some(c) == close => {
                    self.pos += 1;
                    return Ok(counts);
                }
                Some(c @ ('(' | '[' | '{')) => {
                    self.pos += 1;
                    let closing = match c {
                        '(' => ')',
                        '[' => ']',
                        _ => '}',
                    };
                    let inner = self.group(Some(closing))?;
                    let n = self.number().unwrap_or(1.0);
                    add(&mut counts, &inner, n);
                }
                Some('·' | '*') if close.is_none() => {
                    self.pos += 1;
                    let n = self.number().unwrap_or(1.0);
                    let inner = self.group(None)?;
                    add(&mut counts, &inner, n);
                    return Ok(counts);
                }
                Some(c) if c.is_ascii_uppercase() => {
                    let symbol = self.symbol()?;
                    let n = self.number().unwrap_or(1.0);
                    *counts.entry(symbol).or_insert(0.0) += n;
                }
                Some(c) if c.is_whitespace() => self.pos += 1,
                Some(c) => return Err(self.error(&format!("unexpected '{c}'"))),
            }
        }
    }
}

fn add(counts: &mut Composition, other: &Composition, times: f64) {
    for (element, n) in other {
        *counts.entry(element.clone()).or_insert(0.0) += n * times;
    }
}

pub fn parse(formula: &str) -> Result<Composition, EchemError> {
    let mut parser = Parser {
        formula,
        chars: formula.trim().chars().collect(),
        pos: 0,
    };
    let counts = parser.group(None)?;
    if counts.is_empty() {
        return Err(parser.error("no elements"));
    }
    Ok(counts)
}

/// Atomic fractions over all formulas; formulas that do not parse are logged and skipped.
pub fn elemental_composition<'f>(formulas: impl IntoIterator<Item = &'f str>) -> Vec<ElementFraction> {
    let mut total = Composition::new();
    for formula in formulas {
        match parse(formula) {
            Ok(counts) => add(&mut total, &counts, 1.0),
            Err(e) => log::warn!("Skipping formula in elemental composition: {}", e),
        }
    }
    let atoms: f64 = total.values().sum();
    if atoms <= 0.0 {
        return Vec::new();
    }
    total
        .into_iter()
        .map(|(element, n)| ElementFraction {
            element,
            atomic_fraction: n / atoms,
        })
        .collect()
}

/// Sorted, de-duplicated element symbols for search indexing.
pub fn elements<'f>(formulas: impl IntoIterator<Item = &'f str>) -> Vec<String> {
    let mut symbols: Vec<String> = formulas
        .into_iter()
        .filter_map(|f| parse(f).ok())
        .flat_map(|c| c.into_keys())
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}
