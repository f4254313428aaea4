mod ntlm_auth_provider;
mod ntlm_authenticate_message;
mod ntlm_challenge_message;
mod ntlm_message;
mod ntlm_negotiate_message;

pub type NTLMAuthContext = ntlm_auth_provider::NTLMAuthContext;
pub type NTLMAuthProvider = ntlm_auth_provider::NTLMAuthProvider;
pub type NTLMMessage = ntlm_message::NTLMMessage;
pub type NTLMNegotiateFlags = ntlm_message::NTLMNegotiateFlags;
pub type NTLMNegotiateMessageBody = ntlm_negotiate_message::NTLMNegotiateMessageBody;
pub type NTLMChallengeMessageBody = ntlm_challenge_message::NTLMChallengeMessageBody;
pub type NTLMAuthenticateMessageBody = ntlm_authenticate_message::NTLMAuthenticateMessageBody;

pub use ntlm_challenge_message::{AvId, AvPair};
