//! Chat command parsing.

/// Help text sent for `/help`, `/start` and unknown input.
pub const HELP_TEXT: &str = "This bot reads the national COVID-19 figures every day and \
generates charts and summaries.\n\
Commands:\n\
/help - show this text\n\
/recent [days] - nationwide figures for the last days (default 10)\n\
/country - nationwide chart (also /land, /grafiek)\n\
/region <municipality> - chart for one municipality (also /gemeente)";

/// A parsed chat command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    CountryChart,
    /// Municipality name, trimmed; may be empty.
    RegionChart(String),
    /// Optional number of days.
    RecentWindow(Option<u32>),
    /// Anything else, kept verbatim for logging.
    Unknown(String),
}

impl Command {
    /// Parse a message text.
    ///
    /// The first word selects the command; a `@botname` suffix on it is
    /// ignored. Matching is case-insensitive.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let (word, rest) = match text.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (text, ""),
        };
        let word = word.split('@').next().unwrap_or_default().to_lowercase();

        match word.as_str() {
            "/help" | "/start" => Self::Help,
            "/country" | "/land" | "/grafiek" => Self::CountryChart,
            "/region" | "/gemeente" => Self::RegionChart(rest.to_owned()),
            "/recent" | "/laatsteweek" => Self::RecentWindow(rest.parse().ok()),
            _ => Self::Unknown(text.to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn help_aliases() {
        assert_eq!(Command::parse("/help"), Command::Help);
        assert_eq!(Command::parse("/start"), Command::Help);
        assert_eq!(Command::parse("  /HELP  "), Command::Help);
    }

    #[test]
    fn country_aliases() {
        for text in ["/country", "/land", "/grafiek", "/grafiek extra words"] {
            assert_eq!(Command::parse(text), Command::CountryChart, "{text}");
        }
    }

    #[test]
    fn region_takes_rest_of_text() {
        assert_eq!(
            Command::parse("/gemeente  Bergen op Zoom "),
            Command::RegionChart("Bergen op Zoom".to_owned())
        );
        assert_eq!(
            Command::parse("/region"),
            Command::RegionChart(String::new())
        );
    }

    #[test]
    fn recent_with_optional_days() {
        assert_eq!(Command::parse("/recent"), Command::RecentWindow(None));
        assert_eq!(Command::parse("/recent 7"), Command::RecentWindow(Some(7)));
        assert_eq!(Command::parse("/laatsteweek"), Command::RecentWindow(None));
        assert_eq!(Command::parse("/recent lots"), Command::RecentWindow(None));
    }

    #[test]
    fn bot_suffix_is_ignored() {
        assert_eq!(Command::parse("/recent@EpiBot 3"), Command::RecentWindow(Some(3)));
        assert_eq!(Command::parse("/land@EpiBot"), Command::CountryChart);
    }

    #[test]
    fn everything_else_is_unknown() {
        assert_eq!(
            Command::parse("hello there"),
            Command::Unknown("hello there".to_owned())
        );
        assert_eq!(Command::parse("/helpme"), Command::Unknown("/helpme".to_owned()));
        assert_eq!(Command::parse(""), Command::Unknown(String::new()));
    }
}
