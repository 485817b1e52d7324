use std::collections::HashSet;
use std::sync::OnceLock;

use crate::error::DescriptorError;

/// Selectable partner countries: ISO 3166-1 alpha-2 code and display name.
pub static COUNTRIES: &[(&str, &str)] = &[
    ("DZ", "Algeria"),
    ("AO", "Angola"),
    ("BJ", "Benin"),
    ("BW", "Botswana"),
    ("BF", "Burkina Faso"),
    ("BI", "Burundi"),
    ("CV", "Cabo Verde"),
    ("CM", "Cameroon"),
    ("CF", "Central African Republic"),
    ("TD", "Chad"),
    ("KM", "Comoros"),
    ("CG", "Congo"),
    ("CD", "DR Congo"),
    ("CI", "Côte d'Ivoire"),
    ("DJ", "Djibouti"),
    ("EG", "Egypt"),
    ("GQ", "Equatorial Guinea"),
    ("ER", "Eritrea"),
    ("SZ", "Eswatini"),
    ("ET", "Ethiopia"),
    ("GA", "Gabon"),
    ("GM", "Gambia"),
    ("GH", "Ghana"),
    ("GN", "Guinea"),
    ("GW", "Guinea-Bissau"),
    ("KE", "Kenya"),
    ("LS", "Lesotho"),
    ("LR", "Liberia"),
    ("LY", "Libya"),
    ("MG", "Madagascar"),
    ("MW", "Malawi"),
    ("ML", "Mali"),
    ("MR", "Mauritania"),
    ("MU", "Mauritius"),
    ("MA", "Morocco"),
    ("MZ", "Mozambique"),
    ("NA", "Namibia"),
    ("NE", "Niger"),
    ("NG", "Nigeria"),
    ("RW", "Rwanda"),
    ("ST", "São Tomé and Príncipe"),
    ("SN", "Senegal"),
    ("SC", "Seychelles"),
    ("SL", "Sierra Leone"),
    ("SO", "Somalia"),
    ("ZA", "South Africa"),
    ("SS", "South Sudan"),
    ("SD", "Sudan"),
    ("TZ", "Tanzania"),
    ("TG", "Togo"),
    ("TN", "Tunisia"),
    ("UG", "Uganda"),
    ("ZM", "Zambia"),
    ("ZW", "Zimbabwe"),
    ("US", "United States"),
];

static VALIDATED: OnceLock<Result<(), DescriptorError>> = OnceLock::new();

/// Check the table once per process. Called when a session context is built.
pub fn validate() -> Result<(), DescriptorError> {
    VALIDATED.get_or_init(|| validate_table(COUNTRIES)).clone()
}

fn validate_table(table: &[(&str, &str)]) -> Result<(), DescriptorError> {
    let mut seen = HashSet::new();
    for (code, name) in table {
        if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(DescriptorError::InvalidCountryTable(format!(
                "code {code:?} is not two upper-case letters"
            )));
        }
        if name.trim().is_empty() {
            return Err(DescriptorError::InvalidCountryTable(format!(
                "code {code} has no name"
            )));
        }
        if !seen.insert(*code) {
            return Err(DescriptorError::InvalidCountryTable(format!(
                "code {code} listed twice"
            )));
        }
    }
    Ok(())
}

pub fn lookup(code: &str) -> Option<&'static str> {
    COUNTRIES
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

/// Flag emoji built from the two regional indicator symbols of `code`.
pub fn flag(code: &str) -> Option<String> {
    if code.len() != 2 || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    code.bytes()
        .map(|b| char::from_u32(0x1F1E6 + u32::from(b.to_ascii_uppercase() - b'A')))
        .collect()
}
