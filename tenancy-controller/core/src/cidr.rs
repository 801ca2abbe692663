use ipnet::IpNet;
use std::{fmt, net::IpAddr, str::FromStr};

/// A set of networks that addresses and ranges must fall within.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CidrList(Vec<IpNet>);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Cidr {
    Addr(IpAddr),
    Net(IpNet),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("not a valid CIDR or IP address: {0}")]
pub struct CidrParseError(pub String);

// === impl CidrList ===

impl CidrList {
    /// Parses allowed entries. A bare address is a single host.
    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, CidrParseError> {
        entries
            .iter()
            .map(|e| e.as_ref().parse::<Cidr>().map(IpNet::from))
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn contains(&self, candidate: &Cidr) -> bool {
        self.0.iter().any(|net| match candidate {
            Cidr::Addr(addr) => net.contains(addr),
            Cidr::Net(other) => net.contains(other),
        })
    }

    /// Returns the first candidate that is not contained in any allowed
    /// network. Unparseable candidates are never contained.
    pub fn first_outside<'c, S: AsRef<str>>(&self, candidates: &'c [S]) -> Option<&'c str> {
        candidates.iter().map(AsRef::as_ref).find(|c| match c.parse::<Cidr>() {
            Ok(cidr) => !self.contains(&cidr),
            Err(_) => true,
        })
    }
}

impl fmt::Display for CidrList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nets = self.0.iter().map(ToString::to_string).collect::<Vec<_>>();
        f.write_str(&nets.join(", "))
    }
}

// === impl Cidr ===

impl FromStr for Cidr {
    type Err = CidrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(net) = s.parse() {
            return Ok(Self::Net(net));
        }

        if let Ok(addr) = s.parse() {
            return Ok(Self::Addr(addr));
        }

        Err(CidrParseError(s.to_string()))
    }
}

impl From<Cidr> for IpNet {
    fn from(cidr: Cidr) -> IpNet {
        match cidr {
            Cidr::Net(net) => net,
            Cidr::Addr(addr) => IpNet::from(addr),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(&["10.20.0.1/32"], "10.20.0.1", true)]
    #[case(&["10.20.0.1/32"], "10.20.0.2", false)]
    #[case(&["10.20.0.1"], "10.20.0.1", true)]
    #[case(&["10.20.0.1"], "10.20.0.2", false)]
    #[case(&["10.0.0.0/8"], "10.255.3.4", true)]
    #[case(&["10.0.0.0/8"], "11.0.0.1", false)]
    #[case(&["10.0.0.0/8", "192.168.0.0/16"], "192.168.10.1", true)]
    #[case(&["10.0.0.0/8"], "10.1.0.0/16", true)]
    #[case(&["10.1.0.0/16"], "10.0.0.0/8", false)]
    #[case(&["2001:db8::/32"], "2001:db8::1", true)]
    #[case(&[], "10.0.0.1", false)]
    fn containment(#[case] allowed: &[&str], #[case] candidate: &str, #[case] contained: bool) {
        let list = CidrList::parse(allowed).expect("allowed list must parse");
        let candidate = candidate.parse().expect("candidate must parse");
        assert_eq!(list.contains(&candidate), contained);
    }

    #[test]
    fn first_outside_reports_offender() {
        let list = CidrList::parse(&["10.20.0.0/16"]).unwrap();
        assert_eq!(list.first_outside(&["10.20.1.1", "10.20.2.2"]), None);
        assert_eq!(
            list.first_outside(&["10.20.1.1", "10.30.0.1", "10.40.0.1"]),
            Some("10.30.0.1")
        );
        assert_eq!(list.first_outside(&["not-an-ip"]), Some("not-an-ip"));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(
            CidrList::parse(&["10.0.0.0/33"]),
            Err(CidrParseError("10.0.0.0/33".to_string()))
        );
    }
}
