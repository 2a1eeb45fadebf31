//! ISO 3166-1 numeric country codes.
//!
//! Residency and nationality attributes are carried as numeric codes; this
//! table resolves the names and aliases attribute sources tend to supply.

/// A supported country.
pub struct Country {
    pub code: u16,
    pub alpha2: &'static str,
    pub name: &'static str,
    pub aliases: &'static [&'static str],
}

/// Highest valid ISO 3166-1 numeric code.
pub const MAX_COUNTRY_CODE: u16 = 999;

pub const COUNTRIES: &[Country] = &[
    Country { code: 36, alpha2: "AU", name: "Australia", aliases: &[] },
    Country { code: 76, alpha2: "BR", name: "Brazil", aliases: &[] },
    Country { code: 124, alpha2: "CA", name: "Canada", aliases: &[] },
    Country { code: 156, alpha2: "CN", name: "China", aliases: &[] },
    Country { code: 250, alpha2: "FR", name: "France", aliases: &[] },
    Country { code: 276, alpha2: "DE", name: "Germany", aliases: &[] },
    Country { code: 356, alpha2: "IN", name: "India", aliases: &[] },
    Country { code: 380, alpha2: "IT", name: "Italy", aliases: &[] },
    Country { code: 392, alpha2: "JP", name: "Japan", aliases: &[] },
    Country { code: 724, alpha2: "ES", name: "Spain", aliases: &[] },
    Country { code: 826, alpha2: "GB", name: "United Kingdom", aliases: &["UK"] },
    Country { code: 840, alpha2: "US", name: "United States", aliases: &["USA"] },
];

pub fn by_code(code: u16) -> Option<&'static Country> {
    COUNTRIES.iter().find(|c| c.code == code)
}

/// Resolve a name, alpha-2 code or alias (case-insensitive).
pub fn resolve(input: &str) -> Option<&'static Country> {
    let needle = input.trim().to_uppercase();
    COUNTRIES.iter().find(|c| {
        c.alpha2 == needle
            || c.name.to_uppercase() == needle
            || c.aliases.iter().any(|a| *a == needle)
    })
}

pub fn is_valid_code(code: u16) -> bool {
    (1..=MAX_COUNTRY_CODE).contains(&code)
}
