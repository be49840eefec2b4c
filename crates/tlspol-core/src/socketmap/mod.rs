//! Socketmap protocol front end
//!
//! The MTA consults the daemon with netstring-framed request frames of the
//! form `"<CMD> <arg>"`. Replies are netstring-framed directives, except
//! for the JSON command which answers with one newline-terminated document.

pub mod server;

/// One parsed request frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketmapCommand {
    /// `QUERY <domain>`: directive only; TLSRPT per server default
    Query { domain: String },
    /// `QUERYwithTLSRPT <domain>`: append the TLSRPT fragment
    QueryWithTlsRpt { domain: String },
    /// `JSON <domain>`: verbose per-evaluator answer
    Json { domain: String },
    /// Recognized command without an argument
    Empty,
    /// Anything else; answered with `PERM ` and a closed connection
    Unknown { command: String },
}

impl SocketmapCommand {
    /// Parse a request frame; the argument is case-folded here
    pub fn parse(frame: &str) -> Self {
        let (command, arg) = match frame.split_once(' ') {
            Some((command, arg)) => (command, arg),
            None => (frame, ""),
        };

        let domain = arg.trim().to_lowercase();

        match command.to_uppercase().as_str() {
            "QUERY" if domain.is_empty() => SocketmapCommand::Empty,
            "QUERY" => SocketmapCommand::Query { domain },
            "QUERYWITHTLSRPT" if domain.is_empty() => SocketmapCommand::Empty,
            "QUERYWITHTLSRPT" => SocketmapCommand::QueryWithTlsRpt { domain },
            "JSON" if domain.is_empty() => SocketmapCommand::Empty,
            "JSON" => SocketmapCommand::Json { domain },
            _ => SocketmapCommand::Unknown {
                command: frame.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query() {
        assert_eq!(
            SocketmapCommand::parse("QUERY example.com"),
            SocketmapCommand::Query {
                domain: "example.com".to_string()
            }
        );
    }

    #[test]
    fn test_parse_case_folds_domain_and_command() {
        assert_eq!(
            SocketmapCommand::parse("query EXAMPLE.Com"),
            SocketmapCommand::Query {
                domain: "example.com".to_string()
            }
        );
        assert_eq!(
            SocketmapCommand::parse("QUERYwithTLSRPT Example.net"),
            SocketmapCommand::QueryWithTlsRpt {
                domain: "example.net".to_string()
            }
        );
    }

    #[test]
    fn test_parse_json() {
        assert_eq!(
            SocketmapCommand::parse("JSON example.org"),
            SocketmapCommand::Json {
                domain: "example.org".to_string()
            }
        );
    }

    #[test]
    fn test_parse_missing_argument() {
        assert_eq!(SocketmapCommand::parse("QUERY"), SocketmapCommand::Empty);
        assert_eq!(SocketmapCommand::parse("QUERY   "), SocketmapCommand::Empty);
        assert_eq!(SocketmapCommand::parse("JSON "), SocketmapCommand::Empty);
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(
            SocketmapCommand::parse("FOO bar"),
            SocketmapCommand::Unknown {
                command: "FOO bar".to_string()
            }
        );
        assert_eq!(
            SocketmapCommand::parse(""),
            SocketmapCommand::Unknown {
                command: String::new()
            }
        );
    }
}
