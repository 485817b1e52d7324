use std::fmt;
use std::str::FromStr;

use uuid::Uuid;

use super::countries;
use crate::error::DescriptorError;

pub const DIASPORA_TOKEN: &str = "globe";
pub const RANDOM_TOKEN: &str = "random";

/// Partner-selection key handed over by the country picker.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PartnerCode {
    Country(String),
    Diaspora,
    Random,
}

impl PartnerCode {
    pub fn token(&self) -> &str {
        match self {
            PartnerCode::Country(code) => code,
            PartnerCode::Diaspora => DIASPORA_TOKEN,
            PartnerCode::Random => RANDOM_TOKEN,
        }
    }

    /// Human label used in "finding someone from ..." texts.
    pub fn label(&self) -> String {
        match self {
            PartnerCode::Country(code) => {
                let name = countries::lookup(code).unwrap_or(code.as_str());
                match countries::flag(code) {
                    Some(flag) => format!("{flag} {name}"),
                    None => name.to_string(),
                }
            }
            PartnerCode::Diaspora => "🌐 the diaspora".to_string(),
            PartnerCode::Random => "❓ anywhere".to_string(),
        }
    }
}

impl FromStr for PartnerCode {
    type Err = DescriptorError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DescriptorError::EmptyPartnerCode);
        }
        if trimmed.eq_ignore_ascii_case(DIASPORA_TOKEN) {
            return Ok(PartnerCode::Diaspora);
        }
        if trimmed.eq_ignore_ascii_case(RANDOM_TOKEN) {
            return Ok(PartnerCode::Random);
        }
        if countries::lookup(trimmed).is_some() {
            return Ok(PartnerCode::Country(trimmed.to_ascii_uppercase()));
        }
        if trimmed.len() == 2 && trimmed.bytes().all(|b| b.is_ascii_alphabetic()) {
            return Err(DescriptorError::UnknownCountry(trimmed.to_string()));
        }
        Err(DescriptorError::UnknownPartnerCode(trimmed.to_string()))
    }
}

impl fmt::Display for PartnerCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Identity of one matchmaking session. A new descriptor means a new session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    own_code: Option<String>,
    partner_code: PartnerCode,
    client_id: String,
}

impl SessionDescriptor {
    /// `own_code` is the caller's geolocated country, absent when the lookup failed.
    /// A fresh client id is generated when none is given.
    pub fn new(
        own_code: Option<&str>,
        partner_code: PartnerCode,
        client_id: Option<String>,
    ) -> Result<Self, DescriptorError> {
        let own_code = own_code
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(|code| {
                if code.len() == 2 && code.bytes().all(|b| b.is_ascii_alphabetic()) {
                    Ok(code.to_ascii_uppercase())
                } else {
                    Err(DescriptorError::UnknownCountry(code.to_string()))
                }
            })
            .transpose()?;
        if partner_code == PartnerCode::Diaspora && own_code.is_none() {
            return Err(DescriptorError::MissingOwnCode);
        }
        let client_id = client_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        Ok(Self {
            own_code,
            partner_code,
            client_id,
        })
    }

    pub fn own_code(&self) -> Option<&str> {
        self.own_code.as_deref()
    }

    pub fn partner_code(&self) -> &PartnerCode {
        &self.partner_code
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }
}
