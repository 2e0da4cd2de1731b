//! Filename tokenizer (C2): parses centre/date/increment/kind from package and document names.

use regex::Regex;

/// Tokens parsed out of a package (zip) filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZipTokens {
    /// Stable short-name of the producing centre.
    pub centre: String,
    /// Release year.
    pub year: i32,
    /// Release month, 1-12.
    pub month: u32,
    /// Release day, 1-31.
    pub day: u32,
    /// Increment (sequence number within the day).
    pub increment: i32,
}

/// Whether an inner document is a specimen or an experiment record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    /// A specimen document, processed before experiments of the same phase.
    Specimen,
    /// Any non-specimen document.
    Experiment,
}

/// Tokens parsed out of an inner XML document filename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct XmlTokens {
    /// Stable short-name of the producing centre.
    pub centre: String,
    /// Release year.
    pub year: i32,
    /// Release month, 1-12.
    pub month: u32,
    /// Release day, 1-31.
    pub day: u32,
    /// Increment (sequence number within the day).
    pub increment: i32,
    /// Specimen vs experiment.
    pub kind: DocumentKind,
}

/// Result of tokenizing a candidate name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Tokens {
    /// Matched the zip pattern.
    Zip(ZipTokens),
    /// Matched the xml pattern.
    Xml(XmlTokens),
    /// Matched neither pattern.
    None,
}

/// Compiles the two filename patterns once at init and tokenizes candidate names against them.
/// Pure and threadsafe: `tokenize` takes no mutable state and the compiled patterns are
/// immutable after construction.
#[derive(Clone, Debug)]
pub struct Tokenizer {
    zip_pattern: Regex,
    xml_pattern: Regex,
    known_centres: Vec<String>,
}

impl Tokenizer {
    /// Build a tokenizer from the two configured patterns.
    ///
    /// Each pattern must capture five groups `(centre, year, month, day, increment)`; the xml
    /// pattern captures a sixth group used to distinguish specimen from experiment documents.
    /// `known_centres` lists the stable short-names recognized as valid producers; a captured
    /// centre outside this set fails tokenization.
    pub fn new(
        zip_pattern: &str,
        xml_pattern: &str,
        known_centres: Vec<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            zip_pattern: Regex::new(zip_pattern)?,
            xml_pattern: Regex::new(xml_pattern)?,
            known_centres,
        })
    }

    /// Tokenize a candidate name. Tries the zip pattern first, then the xml pattern, returning
    /// `Tokens::None` if neither matches or the captured fields fail validation (unknown centre,
    /// month/day out of range).
    pub fn tokenize(&self, name: &str) -> Tokens {
        if let Some(tokens) = self.try_zip(name) {
            return Tokens::Zip(tokens);
        }
        if let Some(tokens) = self.try_xml(name) {
            return Tokens::Xml(tokens);
        }
        Tokens::None
    }

    fn try_zip(&self, name: &str) -> Option<ZipTokens> {
        let caps = self.zip_pattern.captures(name)?;
        let centre = caps.get(1)?.as_str().to_string();
        let year: i32 = caps.get(2)?.as_str().parse().ok()?;
        let month: u32 = caps.get(3)?.as_str().parse().ok()?;
        let day: u32 = caps.get(4)?.as_str().parse().ok()?;
        let increment: i32 = caps.get(5)?.as_str().parse().ok()?;

        if !self.known_centres.iter().any(|c| c == &centre) {
            return None;
        }
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) || increment < 0 {
            return None;
        }

        Some(ZipTokens {
            centre,
            year,
            month,
            day,
            increment,
        })
    }

    fn try_xml(&self, name: &str) -> Option<XmlTokens> {
        let caps = self.xml_pattern.captures(name)?;
        let centre = caps.get(1)?.as_str().to_string();
        let year: i32 = caps.get(2)?.as_str().parse().ok()?;
        let month: u32 = caps.get(3)?.as_str().parse().ok()?;
        let day: u32 = caps.get(4)?.as_str().parse().ok()?;
        let increment: i32 = caps.get(5)?.as_str().parse().ok()?;
        let kind_str = caps.get(6)?.as_str();

        if !self.known_centres.iter().any(|c| c == &centre) {
            return None;
        }
        if !(1..=12).contains(&month) || !(1..=31).contains(&day) || increment < 0 {
            return None;
        }

        let kind = if kind_str.eq_ignore_ascii_case("specimen") {
            DocumentKind::Specimen
        } else {
            DocumentKind::Experiment
        };

        Some(XmlTokens {
            centre,
            year,
            month,
            day,
            increment,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZIP_PATTERN: &str = r"^([A-Z]+)_(\d{4})(\d{2})(\d{2})_(\d+)\.zip$";
    const XML_PATTERN: &str = r"^([A-Z]+)_(\d{4})(\d{2})(\d{2})_(\d+)_(specimen|experiment)\.xml$";

    fn tokenizer() -> Tokenizer {
        Tokenizer::new(ZIP_PATTERN, XML_PATTERN, vec!["ABCD".into(), "WXYZ".into()])
            .expect("patterns compile")
    }

    #[test]
    fn tokenizes_valid_zip_name() {
        let tokens = tokenizer().tokenize("ABCD_20140115_1.zip");
        assert_eq!(
            tokens,
            Tokens::Zip(ZipTokens {
                centre: "ABCD".into(),
                year: 2014,
                month: 1,
                day: 15,
                increment: 1,
            })
        );
    }

    #[test]
    fn tokenizes_valid_xml_name_as_specimen() {
        let tokens = tokenizer().tokenize("ABCD_20140115_1_specimen.xml");
        assert_eq!(
            tokens,
            Tokens::Xml(XmlTokens {
                centre: "ABCD".into(),
                year: 2014,
                month: 1,
                day: 15,
                increment: 1,
                kind: DocumentKind::Specimen,
            })
        );
    }

    #[test]
    fn tokenizes_valid_xml_name_as_experiment() {
        let tokens = tokenizer().tokenize("ABCD_20140115_1_experiment.xml");
        assert!(matches!(
            tokens,
            Tokens::Xml(XmlTokens {
                kind: DocumentKind::Experiment,
                ..
            })
        ));
    }

    #[test]
    fn unknown_centre_fails_tokenization() {
        assert_eq!(tokenizer().tokenize("QQQQ_20140115_1.zip"), Tokens::None);
    }

    #[test]
    fn out_of_range_month_fails_tokenization() {
        assert_eq!(tokenizer().tokenize("ABCD_20141315_1.zip"), Tokens::None);
    }

    #[test]
    fn out_of_range_day_fails_tokenization() {
        assert_eq!(tokenizer().tokenize("ABCD_20140132_1.zip"), Tokens::None);
    }

    #[test]
    fn unrelated_name_yields_no_tokens() {
        assert_eq!(tokenizer().tokenize("readme.txt"), Tokens::None);
    }

    #[test]
    fn round_trips_through_emit_and_tokenize() {
        for (centre, year, month, day, inc) in [
            ("ABCD", 2014, 1, 15, 1),
            ("WXYZ", 2020, 12, 31, 42),
            ("ABCD", 2014, 2, 28, 0),
        ] {
            let name = format!("{centre}_{year:04}{month:02}{day:02}_{inc}.zip");
            let tokens = tokenizer().tokenize(&name);
            assert_eq!(
                tokens,
                Tokens::Zip(ZipTokens {
                    centre: centre.into(),
                    year,
                    month,
                    day,
                    increment: inc,
                })
            );
        }
    }
}
