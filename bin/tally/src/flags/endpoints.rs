use std::{fmt, str::FromStr};
use url::Url;

/// A list of equivalent RPC endpoints, given as one string separated by `,` or `;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointList(pub Vec<Url>);

impl EndpointList {
    /// Returns the endpoints in configuration order.
    pub fn urls(&self) -> &[Url] {
        &self.0
    }
}

impl FromStr for EndpointList {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let urls = s
            .split([',', ';'])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| Url::parse(part).map_err(|err| format!("invalid endpoint '{part}': {err}")))
            .collect::<Result<Vec<_>, _>>()?;
        if urls.is_empty() {
            return Err("at least one endpoint is required".to_string());
        }
        Ok(Self(urls))
    }
}

impl fmt::Display for EndpointList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let urls: Vec<&str> = self.0.iter().map(Url::as_str).collect();
        f.write_str(&urls.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("http://a:8545", 1)]
    #[case("http://a:8545,http://b:8545", 2)]
    #[case("http://a:8545; http://b:8545 ,http://c:8545", 3)]
    #[case("http://a:8545,,", 1)]
    fn test_parse(#[case] input: &str, #[case] expected: usize) {
        assert_eq!(input.parse::<EndpointList>().unwrap().urls().len(), expected);
    }

    #[rstest]
    #[case("")]
    #[case(" , ;")]
    #[case("http://a:8545,not a url")]
    fn test_parse_errors(#[case] input: &str) {
        assert!(input.parse::<EndpointList>().is_err());
    }

    #[test]
    fn test_order_is_kept() {
        let list: EndpointList = "http://b:1;http://a:2".parse().unwrap();
        assert_eq!(list.to_string(), "http://b:1/,http://a:2/");
    }
}
