//! Mapping from nftables names and families to Prometheus label values.

use crate::source::TableFamily;

/// Sanitize a table or counter name into a label-safe token.
///
/// The name is lower-cased one code point at a time, then every code point
/// outside `[a-z0-9]` is replaced by a single underscore. Consecutive
/// underscores are kept as-is, so the output has exactly one character per
/// input code point.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            // Only U+0130 expands under lowercasing; its first code point
            // is the plain ASCII letter.
            let lower = c.to_lowercase().next().unwrap_or(c);
            if lower.is_ascii_lowercase() || lower.is_ascii_digit() {
                lower
            } else {
                '_'
            }
        })
        .collect()
}

/// Label value for a table family.
///
/// Bridge tables are reported under `netdev`.
pub fn family_label(family: TableFamily) -> &'static str {
    match family {
        TableFamily::Inet => "inet",
        TableFamily::Ipv4 => "ip",
        TableFamily::Ipv6 => "ip6",
        TableFamily::Arp => "arp",
        TableFamily::Netdev => "netdev",
        TableFamily::Bridge => "netdev",
        TableFamily::Unknown => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name_simple() {
        assert_eq!(sanitize_name("ABC-DEF"), "abc_def");
        assert_eq!(sanitize_name("Awesome-Counter-1"), "awesome_counter_1");
        assert_eq!(sanitize_name("http_in"), "http_in");
    }

    #[test]
    fn test_sanitize_name_empty() {
        assert_eq!(sanitize_name(""), "");
    }

    #[test]
    fn test_sanitize_name_no_collapse() {
        assert_eq!(sanitize_name("a--b"), "a__b");
        assert_eq!(sanitize_name("caract#r{$bizares"), "caract_r__bizares");
        assert_eq!(sanitize_name("___"), "___");
    }

    #[test]
    fn test_sanitize_name_one_underscore_per_code_point() {
        // 'É' is two bytes in UTF-8 but a single code point.
        assert_eq!(sanitize_name("NomÉtrange"), "nom_trange");
        // Three-byte and two-byte code points back to back.
        assert_eq!(sanitize_name("Nom\u{221A}\u{E2}trange"), "nom__trange");
        // Four-byte code point.
        assert_eq!(sanitize_name("fw\u{1F525}wall"), "fw_wall");
    }

    #[test]
    fn test_sanitize_name_expanding_lowercase() {
        assert_eq!(sanitize_name("\u{130}STANBUL"), "istanbul");
    }

    #[test]
    fn test_sanitize_name_control_characters() {
        assert_eq!(sanitize_name("a\tb\nc\0"), "a_b_c_");
    }

    #[test]
    fn test_sanitize_name_idempotent() {
        let inputs = [
            "ABC-DEF",
            "Awesome-Counter-1",
            "NomÉtrangeAvecDesCaract#r{$Bizares",
            "",
            "\u{130}\u{1F525}\t",
            "already_clean_42",
        ];

        for input in inputs {
            let once = sanitize_name(input);
            assert_eq!(sanitize_name(&once), once, "input: {:?}", input);
            assert!(
                once.chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'),
                "output {:?} contains characters outside [a-z0-9_]",
                once
            );
        }
    }

    #[test]
    fn test_family_label() {
        assert_eq!(family_label(TableFamily::Inet), "inet");
        assert_eq!(family_label(TableFamily::Ipv4), "ip");
        assert_eq!(family_label(TableFamily::Ipv6), "ip6");
        assert_eq!(family_label(TableFamily::Arp), "arp");
        assert_eq!(family_label(TableFamily::Netdev), "netdev");
        assert_eq!(family_label(TableFamily::Unknown), "unknown");
    }

    #[test]
    fn test_family_label_bridge_is_netdev() {
        assert_eq!(
            family_label(TableFamily::Bridge),
            family_label(TableFamily::Netdev)
        );
    }
}
