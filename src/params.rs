//! Cycle parameter capture and validation.
//!
//! A [`ParserBlock`] carries the already-tokenized words of one command.
//! [`validate`] checks them in a fixed order and, on success, removes every
//! consumed word so the block cannot be reinterpreted with stale values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Field, Reason, ValidationError};

#[derive(Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Debug)]
pub enum CycleKind {
    /// External slot, plunging toward -X, no sag correction.
    Straight,
    /// Internal bore slot, plunging toward +X with sag correction.
    Bore,
}

// Word letters per variant. The two controllers grew different letters for
// length and repeats, so they are looked up here instead of hard-coded.
struct WordMap {
    depth: char,
    length: char,
    tool_width: Option<char>,
    step: char,
    retract: char,
    feed: char,
    repeats: char,
    return_home: char,
}

impl CycleKind {
    fn words(self) -> WordMap {
        match self {
            CycleKind::Straight => WordMap {
                depth: 'D',
                length: 'L',
                tool_width: None,
                step: 'P',
                retract: 'R',
                feed: 'F',
                repeats: 'N',
                return_home: 'H',
            },
            CycleKind::Bore => WordMap {
                depth: 'D',
                length: 'Q',
                tool_width: Some('S'),
                step: 'P',
                retract: 'R',
                feed: 'F',
                repeats: 'L',
                return_home: 'H',
            },
        }
    }

    /// Address letter carrying `field` for this variant.
    pub fn word_for(self, field: Field) -> Option<char> {
        let w = self.words();
        match field {
            Field::Depth => Some(w.depth),
            Field::Length => Some(w.length),
            Field::ToolWidth => w.tool_width,
            Field::StepPerPass => Some(w.step),
            Field::RetractDistance => Some(w.retract),
            Field::FeedRate => Some(w.feed),
            Field::Repeats => Some(w.repeats),
            Field::ReturnHome => Some(w.return_home),
        }
    }
}

/// Most repeats a single pass may ask for.
pub const MAX_REPEATS: u32 = 1_000;

/// Words of one command block, keyed by upper-case address letter.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParserBlock {
    pub code: u32,
    words: BTreeMap<char, f64>,
}

impl ParserBlock {
    pub fn new(code: u32) -> Self {
        Self { code, words: BTreeMap::new() }
    }

    pub fn with_word(mut self, letter: char, value: f64) -> Self {
        self.set(letter, value);
        self
    }

    pub fn set(&mut self, letter: char, value: f64) {
        self.words.insert(letter.to_ascii_uppercase(), value);
    }

    pub fn get(&self, letter: char) -> Option<f64> {
        self.words.get(&letter.to_ascii_uppercase()).copied()
    }

    pub fn has(&self, letter: char) -> bool {
        self.words.contains_key(&letter.to_ascii_uppercase())
    }

    /// Words nobody has consumed yet.
    pub fn remaining(&self) -> impl Iterator<Item = (char, f64)> + '_ {
        self.words.iter().map(|(k, v)| (*k, *v))
    }

    fn spend(&mut self, letter: char) {
        self.words.remove(&letter);
    }
}

/// Immutable parameters of one cycle invocation.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct CycleParameters {
    pub kind: CycleKind,
    pub depth: f64,
    pub length: f64,
    pub tool_width: Option<f64>,
    pub step: f64,
    pub retract: f64,
    pub feed_rate: f64,
    pub repeats: u32,
    pub return_home: bool,
}

fn reject(field: Field, word: char, reason: Reason) -> ValidationError {
    ValidationError { field, word, reason }
}

fn positive(value: f64, field: Field, word: char) -> Result<f64, ValidationError> {
    if !value.is_finite() {
        return Err(reject(field, word, Reason::NotFinite));
    }
    if value <= 0.0 {
        return Err(reject(field, word, Reason::NotPositive));
    }
    Ok(value)
}

fn required(block: &ParserBlock, field: Field, word: char) -> Result<f64, ValidationError> {
    let value = block.get(word).ok_or(reject(field, word, Reason::Missing))?;
    positive(value, field, word)
}

/// Check `block` against the constraints of `kind`.
///
/// `modal_feed` is used when the block carries no explicit F word. Checks run
/// in a fixed order and the first violation is returned; a rejected block is
/// left untouched.
pub fn validate(kind: CycleKind, block: &mut ParserBlock, modal_feed: f64) -> Result<CycleParameters, ValidationError> {
    let w = kind.words();

    let depth = required(block, Field::Depth, w.depth)?;
    let length = required(block, Field::Length, w.length)?;
    let tool_width = match w.tool_width {
        Some(letter) => Some(required(block, Field::ToolWidth, letter)?),
        None => None,
    };
    let step = required(block, Field::StepPerPass, w.step)?;
    let retract = required(block, Field::RetractDistance, w.retract)?;
    let explicit_feed = block.get(w.feed);
    let feed_rate = positive(explicit_feed.unwrap_or(modal_feed), Field::FeedRate, w.feed)?;

    if step > depth {
        return Err(reject(Field::StepPerPass, w.step, Reason::ExceedsDepth));
    }

    let repeats = match block.get(w.repeats) {
        None => 1,
        Some(v) if !v.is_finite() => return Err(reject(Field::Repeats, w.repeats, Reason::NotFinite)),
        Some(v) if v < 1.0 => return Err(reject(Field::Repeats, w.repeats, Reason::BelowOne)),
        Some(v) if v.fract() != 0.0 => return Err(reject(Field::Repeats, w.repeats, Reason::NotWhole)),
        Some(v) if v > f64::from(MAX_REPEATS) => return Err(reject(Field::Repeats, w.repeats, Reason::TooLarge)),
        Some(v) => v as u32,
    };

    let return_home = match block.get(w.return_home) {
        None => true,
        Some(v) if v == 1.0 => true,
        Some(v) if v == 0.0 => false,
        Some(v) if !v.is_finite() => return Err(reject(Field::ReturnHome, w.return_home, Reason::NotFinite)),
        Some(_) => return Err(reject(Field::ReturnHome, w.return_home, Reason::NotBoolean)),
    };

    for letter in [w.depth, w.length, w.step, w.retract, w.repeats, w.return_home] {
        block.spend(letter);
    }
    if let Some(letter) = w.tool_width {
        block.spend(letter);
    }
    if explicit_feed.is_some() {
        block.spend(w.feed);
    }

    Ok(CycleParameters {
        kind,
        depth,
        length,
        tool_width,
        step,
        retract,
        feed_rate,
        repeats,
        return_home,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bore_block() -> ParserBlock {
        ParserBlock::new(801)
            .with_word('D', 2.0)
            .with_word('Q', 10.0)
            .with_word('S', 2.0)
            .with_word('P', 0.1)
            .with_word('R', 2.0)
    }

    fn straight_block() -> ParserBlock {
        ParserBlock::new(800)
            .with_word('D', 2.0)
            .with_word('L', 10.0)
            .with_word('P', 0.5)
            .with_word('R', 2.0)
            .with_word('F', 1000.0)
    }

    #[test]
    fn bore_defaults_repeats_and_return_home() {
        let mut block = bore_block();
        let p = validate(CycleKind::Bore, &mut block, 800.0).expect("valid bore block");
        assert_eq!(p.repeats, 1);
        assert!(p.return_home);
        assert_eq!(p.tool_width, Some(2.0));
        assert_eq!(p.feed_rate, 800.0);
        assert_eq!(p.length, 10.0);
    }

    #[test]
    fn explicit_feed_overrides_modal_feed() {
        let mut block = straight_block();
        let p = validate(CycleKind::Straight, &mut block, 250.0).expect("valid straight block");
        assert_eq!(p.feed_rate, 1000.0);
        assert_eq!(p.tool_width, None);
    }

    #[test]
    fn consumed_words_are_spent_on_success() {
        let mut block = bore_block().with_word('L', 3.0).with_word('H', 0.0).with_word('X', 5.0);
        let p = validate(CycleKind::Bore, &mut block, 500.0).expect("valid");
        assert_eq!(p.repeats, 3);
        assert!(!p.return_home);
        let left: Vec<(char, f64)> = block.remaining().collect();
        assert_eq!(left, vec![('X', 5.0)]);
    }

    #[test]
    fn rejected_block_is_left_untouched() {
        let mut block = bore_block().with_word('P', 3.0);
        let before = block.clone();
        let err = validate(CycleKind::Bore, &mut block, 500.0).unwrap_err();
        assert_eq!(err.field, Field::StepPerPass);
        assert_eq!(err.reason, Reason::ExceedsDepth);
        assert_eq!(block, before);
    }

    #[test]
    fn checks_run_in_declared_order() {
        // Every field is bad; depth must be reported first.
        let mut block = ParserBlock::new(801)
            .with_word('D', 0.0)
            .with_word('Q', -1.0)
            .with_word('S', 0.0)
            .with_word('P', 0.0);
        let err = validate(CycleKind::Bore, &mut block, 0.0).unwrap_err();
        assert_eq!(err.field, Field::Depth);

        block.set('D', 1.0);
        let err = validate(CycleKind::Bore, &mut block, 0.0).unwrap_err();
        assert_eq!((err.field, err.word), (Field::Length, 'Q'));

        block.set('Q', 5.0);
        let err = validate(CycleKind::Bore, &mut block, 0.0).unwrap_err();
        assert_eq!(err.field, Field::ToolWidth);

        block.set('S', 1.0);
        let err = validate(CycleKind::Bore, &mut block, 0.0).unwrap_err();
        assert_eq!(err.field, Field::StepPerPass);

        block.set('P', 0.5);
        let err = validate(CycleKind::Bore, &mut block, 0.0).unwrap_err();
        assert_eq!((err.field, err.reason), (Field::RetractDistance, Reason::Missing));

        block.set('R', 1.0);
        let err = validate(CycleKind::Bore, &mut block, 0.0).unwrap_err();
        assert_eq!((err.field, err.reason), (Field::FeedRate, Reason::NotPositive));
    }

    #[test]
    fn step_larger_than_depth_is_rejected_after_feed() {
        let mut block = straight_block().with_word('P', 5.0).with_word('F', -1.0);
        let err = validate(CycleKind::Straight, &mut block, 100.0).unwrap_err();
        assert_eq!(err.field, Field::FeedRate);

        block.set('F', 100.0);
        let err = validate(CycleKind::Straight, &mut block, 100.0).unwrap_err();
        assert_eq!((err.field, err.reason), (Field::StepPerPass, Reason::ExceedsDepth));
    }

    #[test]
    fn repeats_must_be_whole_and_at_least_one() {
        let mut block = straight_block().with_word('N', 0.0);
        let err = validate(CycleKind::Straight, &mut block, 0.0).unwrap_err();
        assert_eq!((err.field, err.word, err.reason), (Field::Repeats, 'N', Reason::BelowOne));

        block.set('N', 1.5);
        let err = validate(CycleKind::Straight, &mut block, 0.0).unwrap_err();
        assert_eq!(err.reason, Reason::NotWhole);

        block.set('N', 4.0);
        let p = validate(CycleKind::Straight, &mut block, 0.0).expect("valid");
        assert_eq!(p.repeats, 4);
    }

    #[test]
    fn huge_repeat_counts_are_rejected_not_clamped() {
        let mut block = straight_block().with_word('N', 1e10);
        let before = block.clone();
        let err = validate(CycleKind::Straight, &mut block, 0.0).unwrap_err();
        assert_eq!((err.field, err.word, err.reason), (Field::Repeats, 'N', Reason::TooLarge));
        assert_eq!(block, before);

        block.set('N', f64::from(MAX_REPEATS));
        let p = validate(CycleKind::Straight, &mut block, 0.0).expect("limit itself is valid");
        assert_eq!(p.repeats, MAX_REPEATS);
    }

    #[test]
    fn return_home_accepts_only_zero_or_one() {
        let mut block = straight_block().with_word('H', 2.0);
        let err = validate(CycleKind::Straight, &mut block, 0.0).unwrap_err();
        assert_eq!((err.field, err.reason), (Field::ReturnHome, Reason::NotBoolean));

        block.set('H', 0.0);
        let p = validate(CycleKind::Straight, &mut block, 0.0).expect("valid");
        assert!(!p.return_home);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let mut block = straight_block().with_word('D', f64::NAN);
        let err = validate(CycleKind::Straight, &mut block, 0.0).unwrap_err();
        assert_eq!((err.field, err.reason), (Field::Depth, Reason::NotFinite));
    }

    #[test]
    fn step_equal_to_depth_is_allowed() {
        let mut block = straight_block().with_word('P', 2.0);
        assert!(validate(CycleKind::Straight, &mut block, 0.0).is_ok());
    }

    #[test]
    fn letters_are_case_insensitive() {
        let mut block = ParserBlock::new(800)
            .with_word('d', 1.0)
            .with_word('l', 4.0)
            .with_word('p', 0.25)
            .with_word('r', 1.0);
        let p = validate(CycleKind::Straight, &mut block, 300.0).expect("valid");
        assert_eq!(p.depth, 1.0);
        assert_eq!(CycleKind::Bore.word_for(Field::Repeats), Some('L'));
        assert_eq!(CycleKind::Straight.word_for(Field::ToolWidth), None);
    }
}
