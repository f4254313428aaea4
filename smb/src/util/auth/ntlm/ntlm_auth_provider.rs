use rand::RngCore;
use serde::{Deserialize, Serialize};

use smb_core::error::SMBError;
use smb_core::logging::{debug, trace};
use smb_core::SMBResult;

use crate::protocol::body::FileTime;
use crate::util::auth::ntlm::{NTLMAuthenticateMessageBody, NTLMMessage, NTLMNegotiateFlags, NTLMNegotiateMessageBody};
use crate::util::auth::{AuthContext, AuthProvider, User};
use crate::util::crypto::ntlm_v2::{compute_response, ntowf_v2, rc4_transform};

/// NTLMv2 initiator producing raw NTLMSSP tokens.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct NTLMAuthProvider {
    user: User,
    work_station: String,
}

impl NTLMAuthProvider {
    pub fn new(user: User, work_station: impl Into<String>) -> Self {
        Self {
            user,
            work_station: work_station.into(),
        }
    }

    fn negotiate_flags(&self) -> NTLMNegotiateFlags {
        if self.user.is_anonymous() {
            NTLMNegotiateFlags::client_default() | NTLMNegotiateFlags::ANONYMOUS
        } else {
            NTLMNegotiateFlags::client_default()
        }
    }

    fn authenticate(&self, challenge_token: &[u8], context: &mut NTLMAuthContext) -> SMBResult<Vec<u8>> {
        let NTLMMessage::Challenge(challenge) = NTLMMessage::parse(challenge_token)? else {
            return Err(SMBError::auth_error("Expected an NTLM challenge message"));
        };
        let flags = challenge.negotiate_flags & self.negotiate_flags();
        trace!(?flags, "NTLM challenge received");
        if self.user.is_anonymous() {
            context.session_key = None;
            return Ok(NTLMAuthenticateMessageBody {
                negotiate_flags: flags | NTLMNegotiateFlags::ANONYMOUS,
                work_station: self.work_station.clone(),
                lm_challenge_response: vec![0],
                ..Default::default()
            }.as_bytes());
        }

        let response_key = ntowf_v2(&self.user.password, &self.user.username, &self.user.domain)?;
        let mut client_challenge = [0_u8; 8];
        rand::thread_rng().fill_bytes(&mut client_challenge);
        let server_timestamp = challenge.timestamp()?;
        let timestamp = server_timestamp.unwrap_or_else(|| FileTime::now().raw());
        let response = compute_response(
            &response_key,
            &challenge.server_challenge,
            &client_challenge,
            timestamp,
            &challenge.target_info,
            server_timestamp.is_some(),
        )?;

        let (session_key, encrypted_session_key) = if flags.contains(NTLMNegotiateFlags::KEY_EXCHANGE) {
            let mut exported = vec![0_u8; 16];
            rand::thread_rng().fill_bytes(&mut exported);
            let encrypted = rc4_transform(&response.session_base_key, &exported)?;
            (exported, encrypted)
        } else {
            (response.session_base_key.clone(), Vec::new())
        };
        context.session_key = Some(session_key);
        debug!(user = %self.user.username, "NTLM authenticate message built");
        Ok(NTLMAuthenticateMessageBody {
            negotiate_flags: flags,
            domain_name: self.user.domain.clone(),
            user_name: self.user.username.clone(),
            work_station: self.work_station.clone(),
            lm_challenge_response: response.lm_challenge_response,
            nt_challenge_response: response.nt_challenge_response,
            encrypted_session_key,
        }.as_bytes())
    }
}

impl AuthProvider for NTLMAuthProvider {
    type Context = NTLMAuthContext;

    fn init_context(&self) -> NTLMAuthContext {
        NTLMAuthContext::new()
    }

    fn initiate_security_context(&self, input_token: &[u8], context: &mut NTLMAuthContext) -> SMBResult<Vec<u8>> {
        match context.stage {
            NTLMStage::Initial => {
                context.stage = NTLMStage::NegotiateSent;
                Ok(NTLMNegotiateMessageBody::new(self.negotiate_flags()).as_bytes())
            }
            NTLMStage::NegotiateSent => {
                let token = self.authenticate(input_token, context)?;
                context.stage = NTLMStage::Complete;
                Ok(token)
            }
            NTLMStage::Complete => Ok(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NTLMStage {
    Initial,
    NegotiateSent,
    Complete,
}

#[derive(Debug)]
pub struct NTLMAuthContext {
    stage: NTLMStage,
    session_key: Option<Vec<u8>>,
}

impl NTLMAuthContext {
    pub fn new() -> Self {
        Self {
            stage: NTLMStage::Initial,
            session_key: None,
        }
    }
}

impl Default for NTLMAuthContext {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthContext for NTLMAuthContext {
    fn is_complete(&self) -> bool {
        self.stage == NTLMStage::Complete
    }

    fn session_key(&self) -> Option<&[u8]> {
        self.session_key.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use crate::util::auth::ntlm::NTLMChallengeMessageBody;

    use super::*;

    fn challenge() -> Vec<u8> {
        NTLMChallengeMessageBody::new("SERVER".into(), NTLMNegotiateFlags::client_default(), vec![]).as_bytes()
    }

    #[test]
    fn three_leg_exchange_yields_session_key() {
        let provider = NTLMAuthProvider::new(User::new("User", "Password").with_domain("Domain"), "HOST");
        let mut context = provider.init_context();
        let negotiate = provider.initiate_security_context(&[], &mut context).unwrap();
        assert!(matches!(NTLMMessage::parse(&negotiate).unwrap(), NTLMMessage::Negotiate(_)));
        assert!(!context.is_complete());

        let authenticate = provider.initiate_security_context(&challenge(), &mut context).unwrap();
        let NTLMMessage::Authenticate(body) = NTLMMessage::parse(&authenticate).unwrap() else {
            panic!("expected authenticate");
        };
        assert_eq!(body.user_name, "User");
        assert_eq!(body.encrypted_session_key.len(), 16);
        assert!(context.is_complete());
        assert_eq!(context.session_key().map(|k| k.len()), Some(16));
    }

    #[test]
    fn anonymous_logon_has_no_session_key() {
        let provider = NTLMAuthProvider::new(User::anonymous(), "HOST");
        let mut context = provider.init_context();
        provider.initiate_security_context(&[], &mut context).unwrap();
        let authenticate = provider.initiate_security_context(&challenge(), &mut context).unwrap();
        let NTLMMessage::Authenticate(body) = NTLMMessage::parse(&authenticate).unwrap() else {
            panic!("expected authenticate");
        };
        assert!(body.negotiate_flags.contains(NTLMNegotiateFlags::ANONYMOUS));
        assert!(body.nt_challenge_response.is_empty());
        assert!(context.session_key().is_none());
    }

    #[test]
    fn non_challenge_token_fails() {
        let provider = NTLMAuthProvider::new(User::new("u", "p"), "HOST");
        let mut context = provider.init_context();
        let negotiate = provider.initiate_security_context(&[], &mut context).unwrap();
        assert!(provider.initiate_security_context(&negotiate, &mut context).is_err());
    }
}
