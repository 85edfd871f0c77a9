use async_trait::async_trait;

/// A toss prompt successfully parsed out of free text.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToss {
    pub topic: String,
    pub options: [String; 2],
    pub stake_stablecoin: f64,
}

/// Why a prompt couldn't be parsed into a `ParsedToss`, as an explicit sum
/// type rather than a bare error string; `AgentFront` maps each reason to
/// a reply template.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    NoTopic,
    WrongOptionCount(usize),
    DuplicateOptions,
    InvalidStake(String),
    Other(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ParseError::NoTopic => write!(f, "couldn't find a topic in that prompt"),
            ParseError::WrongOptionCount(n) => {
                write!(f, "expected exactly two options, found {}", n)
            }
            ParseError::DuplicateOptions => write!(f, "the two options must be different"),
            ParseError::InvalidStake(s) => write!(f, "couldn't understand the stake: {}", s),
            ParseError::Other(s) => write!(f, "{}", s),
        }
    }
}

/// The natural-language parser, treated as an opaque capability returning
/// a parsed record or a structured error; the real NLP is out of scope.
#[async_trait]
pub trait TossParser: Send + Sync {
    async fn parse(&self, prompt: &str) -> Result<ParsedToss, ParseError>;
}

/// A small heuristic reference parser, since the real NLP capability is out
/// of scope and there is nothing in the corpus to ground a wire format on.
/// Handles the shape every literal end-to-end scenario uses:
/// `<topic>, <optionA> vs <optionB>, <stake>` or `<optionA> vs <optionB>`
/// alone (topic defaults to the prompt itself), with an optional trailing
/// stake and a default two-option set when none is given. Good enough to
/// exercise the rest of the system end to end; a production deployment
/// swaps this for an LLM-backed implementation behind the same trait.
pub struct NaiveTossParser;

#[async_trait]
impl TossParser for NaiveTossParser {
    async fn parse(&self, prompt: &str) -> Result<ParsedToss, ParseError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ParseError::NoTopic);
        }

        let mut stake = crate::models::DEFAULT_STAKE_STABLECOIN
            .parse::<f64>()
            .expect("default stake literal parses");
        let mut rest = prompt.to_owned();

        if let Some(idx) = rest.rfind(',') {
            let tail = rest[idx + 1..].trim();
            if let Ok(parsed_stake) = tail.parse::<f64>() {
                if parsed_stake <= 0.0 {
                    return Err(ParseError::InvalidStake(tail.to_owned()));
                }
                stake = parsed_stake;
                rest = rest[..idx].trim().to_owned();
            }
        }

        let options = if let Some(vs_idx) = find_vs(&rest) {
            let a = rest[..vs_idx].trim().to_owned();
            let b = rest[vs_idx + 4..].trim().to_owned();
            if a.is_empty() || b.is_empty() {
                return Err(ParseError::WrongOptionCount(if a.is_empty() { 0 } else { 1 }));
            }
            if a.eq_ignore_ascii_case(&b) {
                return Err(ParseError::DuplicateOptions);
            }
            [a, b]
        } else {
            crate::models::DEFAULT_OPTIONS.map(|s| s.to_owned())
        };

        if rest.is_empty() {
            return Err(ParseError::NoTopic);
        }

        Ok(ParsedToss {
            topic: rest,
            options,
            stake_stablecoin: stake,
        })
    }
}

/// Finds the first standalone " vs " (case-insensitive) separating the two
/// option labels ("Lakers vs Celtics").
fn find_vs(s: &str) -> Option<usize> {
    let lower = s.to_lowercase();
    lower.find(" vs ")
}
