//! Master user password generation
//!
//! RDS master passwords may contain any printable ASCII character except
//! `/`, `@`, `"`, and space. The generator owns a validated symbol
//! allow-list and draws from the OS CSPRNG; it is constructed once at
//! startup and injected into the orchestrator rather than living in
//! process-global state.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng};
use thiserror::Error;

/// Symbols accepted by RDS in master user passwords.
///
/// <https://docs.aws.amazon.com/AmazonRDS/latest/APIReference/API_ModifyDBInstance.html>
pub const MASTER_USER_PASSWORD_SYMBOLS: &str = "~!#$%^&*()_+`-={}|[]\\:<>?,.";

/// Maximum master password length MySQL accepts; we always generate at it.
pub const MASTER_USER_PASSWORD_LENGTH: usize = 41;

/// Minimum digit characters per generated password
const DIGIT_COUNT: usize = 10;

/// Minimum symbol characters per generated password
const SYMBOL_COUNT: usize = 10;

/// Characters RDS rejects in master passwords
const FORBIDDEN: &[char] = &['/', '@', '"', ' '];

const DIGITS: &[u8] = b"0123456789";
const LETTERS: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Symbol allow-list validation errors
#[derive(Debug, Error)]
pub enum PasswordError {
    /// The allow-list has no symbols at all
    #[error("the symbol allow-list is empty")]
    EmptySymbols,

    /// The allow-list contains a character RDS rejects
    #[error("symbol {0:?} is not accepted in RDS master passwords")]
    ForbiddenSymbol(char),

    /// The allow-list contains something other than a printable ASCII symbol
    #[error("{0:?} is not a printable ASCII symbol")]
    NotASymbol(char),

    /// The allow-list lists the same symbol twice
    #[error("symbol {0:?} appears more than once in the allow-list")]
    DuplicateSymbol(char),
}

/// Generator for RDS master user passwords.
///
/// Passwords are [`MASTER_USER_PASSWORD_LENGTH`] characters: 10 digits,
/// 10 symbols from the allow-list, and letters for the remainder, uniformly
/// shuffled.
#[derive(Debug, Clone)]
pub struct PasswordGenerator {
    symbols: Vec<char>,
}

impl PasswordGenerator {
    /// Create a generator with a custom symbol allow-list.
    ///
    /// Fails if the allow-list is empty, contains a character RDS rejects,
    /// a non-symbol character, or a duplicate. A malformed allow-list is a
    /// configuration error; it is never silently filtered or truncated.
    pub fn new(symbols: &str) -> Result<Self, PasswordError> {
        if symbols.is_empty() {
            return Err(PasswordError::EmptySymbols);
        }

        let mut validated = Vec::with_capacity(symbols.len());
        for c in symbols.chars() {
            if FORBIDDEN.contains(&c) {
                return Err(PasswordError::ForbiddenSymbol(c));
            }
            if !c.is_ascii_graphic() || c.is_ascii_alphanumeric() {
                return Err(PasswordError::NotASymbol(c));
            }
            if validated.contains(&c) {
                return Err(PasswordError::DuplicateSymbol(c));
            }
            validated.push(c);
        }

        Ok(Self { symbols: validated })
    }

    /// Create the generator for RDS master user passwords.
    pub fn master_user_password() -> Result<Self, PasswordError> {
        Self::new(MASTER_USER_PASSWORD_SYMBOLS)
    }

    /// Generate a password from the OS CSPRNG.
    pub fn generate(&self) -> String {
        self.generate_with(&mut OsRng)
    }

    /// Generate a password from the supplied CSPRNG.
    pub fn generate_with<R: Rng + CryptoRng>(&self, rng: &mut R) -> String {
        let mut chars = Vec::with_capacity(MASTER_USER_PASSWORD_LENGTH);

        for _ in 0..DIGIT_COUNT {
            chars.push(DIGITS[rng.gen_range(0..DIGITS.len())] as char);
        }
        for _ in 0..SYMBOL_COUNT {
            chars.push(self.symbols[rng.gen_range(0..self.symbols.len())]);
        }
        while chars.len() < MASTER_USER_PASSWORD_LENGTH {
            chars.push(LETTERS[rng.gen_range(0..LETTERS.len())] as char);
        }

        chars.shuffle(rng);
        chars.into_iter().collect()
    }
}
