// Copyright Istio Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use hickory_proto::rr::Name;

use crate::dns::Error;

/// Result of matching a requested name against the strip domain.
#[derive(Debug, PartialEq, Eq)]
pub enum Stripped {
    /// The name is inside the domain; holds the leading labels (lowercase, not fully qualified).
    Host(Name),
    /// The name is the domain itself, leaving no host to look up.
    Empty,
    /// The name is outside the domain.
    NoMatch,
}

/// Parses a configured suffix such as `.docker` into a lowercase domain.
///
/// Leading and trailing dots are ignored, so `docker`, `.docker` and `.docker.` are equivalent.
pub fn as_domain(suffix: &str) -> Result<Name, Error> {
    let trimmed = suffix.trim_matches('.');
    if trimmed.is_empty() {
        return Err(Error::InvalidSuffix(suffix.to_string()));
    }
    let mut name =
        Name::from_utf8(trimmed).map_err(|_| Error::InvalidSuffix(suffix.to_string()))?;
    name.set_fqdn(true);
    Ok(name.to_lowercase())
}

/// Returns true if the given name ends with the labels of the domain.
///
/// Comparison is per label, so `mydocker.` never ends with `docker.`.
pub fn has_domain(name: &Name, domain: &Name) -> bool {
    if domain.is_wildcard() || name.num_labels() < domain.num_labels() {
        return false;
    }

    let name_iter = name.iter();
    let domain_iter = domain.iter();

    // Skip ahead to the start of the domain.
    let num_skip = name_iter.len() - domain_iter.len();
    let name_iter = name_iter.skip(num_skip);

    name_iter.eq(domain_iter)
}

/// Strips a lowercase `domain` from `name`, ignoring the case of `name`.
pub fn strip_domain(name: &Name, domain: &Name) -> Stripped {
    let name = name.to_lowercase();
    if !has_domain(&name, domain) {
        return Stripped::NoMatch;
    }

    let num_labels = (name.num_labels() - domain.num_labels()) as usize;
    if num_labels == 0 {
        return Stripped::Empty;
    }
    match Name::from_labels(name.iter().take(num_labels)) {
        Ok(mut host) => {
            host.set_fqdn(false);
            Stripped::Host(host)
        }
        Err(_) => Stripped::Empty,
    }
}
