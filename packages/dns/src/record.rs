//! Resource records in zone-file notation.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use hickory_proto::rr::rdata::{A, AAAA, CNAME, TXT};
use hickory_proto::rr::{self, Name, RecordType};

use crate::error::DnsError;

pub const DEFAULT_TTL: u32 = 3600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Cname(String),
    Txt(Vec<String>),
}

impl RData {
    pub fn record_type(&self) -> RecordType {
        match self {
            RData::A(_) => RecordType::A,
            RData::Aaaa(_) => RecordType::AAAA,
            RData::Cname(_) => RecordType::CNAME,
            RData::Txt(_) => RecordType::TXT,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RData::A(_) => "A",
            RData::Aaaa(_) => "AAAA",
            RData::Cname(_) => "CNAME",
            RData::Txt(_) => "TXT",
        }
    }

    fn to_rdata(&self) -> Result<rr::RData, DnsError> {
        Ok(match self {
            RData::A(ip) => rr::RData::A(A(*ip)),
            RData::Aaaa(ip) => rr::RData::AAAA(AAAA(*ip)),
            RData::Cname(target) => rr::RData::CNAME(CNAME(domain_name(target)?)),
            RData::Txt(parts) => rr::RData::TXT(TXT::new(parts.clone())),
        })
    }
}

/// One record served by a nameserver element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Lower-case, fully qualified (trailing dot).
    pub name: String,
    pub ttl: u32,
    pub data: RData,
}

/// Lower-case a domain name and make it fully qualified.
pub fn canonical_name(name: &str) -> String {
    let mut n = name.trim().to_ascii_lowercase();
    if !n.ends_with('.') {
        n.push('.');
    }
    n
}

fn domain_name(name: &str) -> Result<Name, DnsError> {
    Name::from_ascii(name).map_err(|_| DnsError::InvalidName(name.to_string()))
}

impl Record {
    /// Parse `<name> [ttl] [IN] <type> <data>`.
    ///
    /// ```rust
    /// use circuit_dns::Record;
    ///
    /// let rr = Record::parse("db.cluster. 60 IN A 10.0.0.4").unwrap();
    /// assert_eq!(rr.ttl, 60);
    /// assert_eq!(rr.to_string(), "db.cluster.\t60\tIN\tA\t10.0.0.4");
    /// ```
    pub fn parse(src: &str) -> Result<Record, DnsError> {
        let invalid = |message: &str| DnsError::InvalidRecord {
            record: src.to_string(),
            message: message.to_string(),
        };

        let mut tokens = src.split_whitespace().peekable();
        let name = tokens.next().ok_or_else(|| invalid("empty record"))?;

        let mut ttl = DEFAULT_TTL;
        if let Some(t) = tokens.peek().and_then(|t| t.parse::<u32>().ok()) {
            ttl = t;
            tokens.next();
        }
        if tokens
            .peek()
            .is_some_and(|class| class.eq_ignore_ascii_case("IN"))
        {
            tokens.next();
        }

        let rtype = tokens
            .next()
            .ok_or_else(|| invalid("missing record type"))?
            .to_ascii_uppercase();
        let rest: Vec<&str> = tokens.collect();
        if rest.is_empty() {
            return Err(invalid("missing record data"));
        }
        let single = || -> Result<&str, DnsError> {
            match rest.as_slice() {
                [one] => Ok(one),
                _ => Err(invalid("expecting a single data field")),
            }
        };

        let data = match rtype.as_str() {
            "A" => RData::A(
                Ipv4Addr::from_str(single()?).map_err(|_| invalid("bad IPv4 address"))?,
            ),
            "AAAA" => RData::Aaaa(
                Ipv6Addr::from_str(single()?).map_err(|_| invalid("bad IPv6 address"))?,
            ),
            "CNAME" => {
                let target = canonical_name(single()?);
                domain_name(&target)?;
                RData::Cname(target)
            }
            "TXT" => RData::Txt(parse_txt(&rest.join(" "))),
            other => {
                return Err(DnsError::UnsupportedType(other.to_string()));
            }
        };

        let name = canonical_name(name);
        domain_name(&name)?;
        Ok(Record { name, ttl, data })
    }

    /// The record as it goes on the wire.
    pub fn to_record(&self) -> Result<rr::Record, DnsError> {
        Ok(rr::Record::from_rdata(
            domain_name(&self.name)?,
            self.ttl,
            self.data.to_rdata()?,
        ))
    }

    /// Whether this record answers a question of type `qtype`.
    pub fn answers(&self, qtype: RecordType) -> bool {
        let own = self.data.record_type();
        qtype == RecordType::ANY || qtype == own || own == RecordType::CNAME
    }
}

/// Split TXT data into its quoted strings. Unquoted text is one string.
fn parse_txt(src: &str) -> Vec<String> {
    if !src.starts_with('"') {
        return vec![src.to_string()];
    }
    src.split('"')
        .enumerate()
        .filter(|(i, _)| i % 2 == 1)
        .map(|(_, s)| s.to_string())
        .collect()
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\t{}\tIN\t{}\t",
            self.name,
            self.ttl,
            self.data.type_name()
        )?;
        match &self.data {
            RData::A(ip) => write!(f, "{}", ip),
            RData::Aaaa(ip) => write!(f, "{}", ip),
            RData::Cname(target) => f.write_str(target),
            RData::Txt(parts) => {
                let quoted: Vec<String> = parts.iter().map(|p| format!("\"{}\"", p)).collect();
                f.write_str(&quoted.join(" "))
            }
        }
    }
}

impl FromStr for Record {
    type Err = DnsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Record::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_record_gets_defaults() {
        let rr = Record::parse("Web.Cluster A 10.0.0.1").unwrap();
        assert_eq!(rr.name, "web.cluster.");
        assert_eq!(rr.ttl, DEFAULT_TTL);
        assert_eq!(rr.data, RData::A(Ipv4Addr::new(10, 0, 0, 1)));
    }

    #[test]
    fn full_record() {
        let rr = Record::parse("web.cluster. 30 in AAAA ::1").unwrap();
        assert_eq!(rr.ttl, 30);
        assert_eq!(rr.data, RData::Aaaa(Ipv6Addr::LOCALHOST));
    }

    #[test]
    fn cname_target_is_canonical() {
        let rr = Record::parse("alias CNAME Web.Cluster").unwrap();
        assert_eq!(rr.data, RData::Cname("web.cluster.".to_string()));
        assert!(rr.answers(RecordType::A));
    }

    #[test]
    fn txt_strings() {
        let rr = Record::parse(r#"info TXT "hello world" "second""#).unwrap();
        assert_eq!(
            rr.data,
            RData::Txt(vec!["hello world".to_string(), "second".to_string()])
        );
        assert_eq!(
            rr.to_string(),
            "info.\t3600\tIN\tTXT\t\"hello world\" \"second\""
        );

        let bare = Record::parse("info TXT plain").unwrap();
        assert_eq!(bare.data, RData::Txt(vec!["plain".to_string()]));
    }

    #[test]
    fn rejects_bad_records() {
        assert!(Record::parse("").is_err());
        assert!(Record::parse("web A").is_err());
        assert!(Record::parse("web A 300.1.1.1").is_err());
        assert!(Record::parse("web A 1.1.1.1 2.2.2.2").is_err());
        assert!(matches!(
            Record::parse("web MX 10 mail"),
            Err(DnsError::UnsupportedType(t)) if t == "MX"
        ));
    }

    #[test]
    fn type_matching() {
        let rr = Record::parse("web A 10.0.0.1").unwrap();
        assert!(rr.answers(RecordType::A));
        assert!(rr.answers(RecordType::ANY));
        assert!(!rr.answers(RecordType::AAAA));
    }

    #[test]
    fn over_long_labels_are_rejected() {
        let label = "x".repeat(64);
        assert!(matches!(
            Record::parse(&format!("{} A 10.0.0.1", label)),
            Err(DnsError::InvalidName(_))
        ));
    }

    #[test]
    fn wire_record() {
        let record = Record::parse("web.cluster. 60 A 10.0.0.1")
            .unwrap()
            .to_record()
            .unwrap();
        assert_eq!(record.name().to_ascii(), "web.cluster.");
        assert_eq!(record.ttl(), 60);
        assert_eq!(record.record_type(), RecordType::A);
        assert_eq!(
            record.data(),
            Some(&rr::RData::A(A(Ipv4Addr::new(10, 0, 0, 1))))
        );
    }
}
