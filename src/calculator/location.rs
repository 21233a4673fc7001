use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Error;

use super::countries::{Country, ALIASES, COUNTRIES};

/// Countries a campaign targets, as ISO-3166 alpha-2 codes in the order the
/// campaign first listed them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TargetingSpec {
    pub countries: Vec<String>,
    pub rejected: Vec<String>,
}

fn canonical(input: &str) -> String {
    input
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn by_alpha2(code: &str) -> Option<&'static Country> {
    COUNTRIES.iter().find(|country| country.alpha2 == code)
}

fn by_alpha3(code: &str) -> Option<&'static Country> {
    COUNTRIES.iter().find(|country| country.alpha3 == code)
}

fn by_name(name: &str) -> Option<&'static Country> {
    COUNTRIES
        .iter()
        .find(|country| country.name.to_uppercase() == name)
        .or_else(|| {
            // "Bolivia, Plurinational State of" is also just "Bolivia"
            COUNTRIES.iter().find(|country| {
                country
                    .name
                    .split(',')
                    .next()
                    .map(|short| short.to_uppercase() == name)
                    .unwrap_or(false)
            })
        })
}

/// Resolves free-form location input to an ISO-3166 alpha-2 code.
///
/// Aliases win over codes so that "USA" and "UK" resolve the way people mean
/// them; then alpha-2, alpha-3 and finally English names are tried.
pub fn normalize_country(input: &str) -> Result<&'static str, Error> {
    let key = canonical(input);

    let alias = ALIASES
        .iter()
        .find(|(alias, _)| *alias == key)
        .and_then(|(_, code)| by_alpha2(code));

    let country = alias
        .or_else(|| match key.len() {
            2 => by_alpha2(&key),
            3 => by_alpha3(&key),
            _ => None,
        })
        .or_else(|| by_name(&key));

    country
        .map(|country| country.alpha2)
        .ok_or_else(|| Error::UnrecognizedLocation {
            location: input.to_owned(),
        })
}

/// Builds the country targeting for a list of locations. Unrecognized entries
/// are dropped and reported in `rejected`; if nothing resolves the campaign
/// cannot be targeted at all.
pub fn resolve_targeting<S: AsRef<str>>(locations: &[S]) -> Result<TargetingSpec, Error> {
    let mut spec = TargetingSpec::default();

    for location in locations {
        let location = location.as_ref();
        match normalize_country(location) {
            Ok(code) => {
                if !spec.countries.iter().any(|existing| existing == code) {
                    spec.countries.push(code.to_owned());
                }
            }
            Err(_) => {
                warn!(location, "dropping unrecognized location");
                spec.rejected.push(location.to_owned());
            }
        }
    }

    if spec.countries.is_empty() {
        return Err(Error::NoValidLocations {
            rejected: spec.rejected,
        });
    }

    Ok(spec)
}
