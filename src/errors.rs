use actix::MailboxError;
use failure::Fail;

/// The single error taxonomy for the crate. Variants map onto the error
/// kinds enumerated by the error handling design: engine-local kinds are
/// reported back to the chat user by `AgentFront`, the rest are logged by
/// the supervisor and never kill a worker.
#[derive(Fail, Debug, Clone, PartialEq)]
pub enum Error {
    #[fail(display = "toss not found: {}", _0)]
    NotFound(String),

    #[fail(display = "toss {} is not in a state that allows this action", _0)]
    BadState(String),

    #[fail(display = "{} already joined this toss", _0)]
    DuplicateParticipant(String),

    #[fail(display = "{} is not one of this toss's options", _0)]
    InvalidOption(String),

    #[fail(display = "participant has not paid the stake")]
    Unpaid,

    #[fail(display = "only the creator of a toss may do that")]
    NotCreator,

    #[fail(display = "a toss needs at least two participants to close")]
    NotEnoughPlayers,

    #[fail(display = "amount {} exceeds the maximum allowed transfer", _0)]
    AmountTooLarge(String),

    #[fail(display = "could not determine which option this payment was for")]
    UnresolvedOption,

    #[fail(display = "transaction could not be verified on-chain")]
    UnverifiedTx,

    #[fail(display = "transaction failed on-chain")]
    FailedTx,

    #[fail(display = "the custodial wallet provider is unavailable: {}", _0)]
    ProviderUnavailable(String),

    #[fail(display = "wallet transfer failed: {}", _0)]
    TransferFailed(String),

    #[fail(display = "invalid recipient address: {}", _0)]
    InvalidAddress(String),

    #[fail(display = "insufficient funds in escrow wallet")]
    InsufficientFunds,

    #[fail(display = "transport error: {}", _0)]
    TransportError(String),

    #[fail(display = "failed to parse toss prompt: {}", _0)]
    ParseError(String),

    #[fail(display = "store error: {}", _0)]
    Store(String),

    #[fail(display = "a non-terminal toss {} already exists in this conversation", _0)]
    ActiveTossExists(String),

    #[fail(display = "this command is only available in a group chat")]
    GroupOnly,

    #[fail(display = "this command is only available in a direct message")]
    DmOnly,

    #[fail(display = "no active toss in this conversation")]
    NoActiveToss,

    #[fail(display = "internal error: {}", _0)]
    Internal(String),
}

impl From<MailboxError> for Error {
    fn from(error: MailboxError) -> Self {
        Error::Internal(format!("actor mailbox error: {}", error))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Error::Store(format!("json error: {}", error))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Store(format!("io error: {}", error))
    }
}

impl Error {
    /// True for kinds that `AgentFront` should render back to the chat user
    /// verbatim (modulo templating). Everything else is logged only.
    pub fn is_user_facing(&self) -> bool {
        !matches!(
            self,
            Error::TransportError(_) | Error::ProviderUnavailable(_) | Error::Internal(_)
        )
    }
}
