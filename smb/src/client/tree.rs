use std::sync::{Arc, RwLock};

use smb_core::error::SMBError;
use smb_core::logging::{debug, info, warn};
use smb_core::nt_status::NTStatus;
use smb_core::SMBResult;

use crate::client::config::SMBClientConfig;
use crate::client::connection::{Connection, MessageSecurity, OutgoingRequest};
use crate::client::negotiate::NegotiatedParameters;
use crate::client::session::Session;
use crate::protocol::body::empty::SMBEmpty;
use crate::protocol::body::ioctl::{SMBIoCtlCode, SMBIoCtlRequest, ValidateNegotiateInfoRequest, ValidateNegotiateInfoResponse, SMB_IOCTL_NO_FILE};
use crate::protocol::body::tree_connect::{SMBShareFlags, SMBShareType, SMBTreeCapabilities, SMBTreeConnectRequest};
use crate::protocol::body::{SMBAccessMask, SMBBody, SMBDialect};

const VALIDATE_NEGOTIATE_OUTPUT_SIZE: u32 = 24;

/// What the server told us about a share, after the local encryption overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareInfo {
    pub tree_id: u32,
    pub share_type: SMBShareType,
    pub share_flags: SMBShareFlags,
    pub capabilities: SMBTreeCapabilities,
    pub maximal_access: SMBAccessMask,
}

impl ShareInfo {
    pub fn is_pipe(&self) -> bool {
        self.share_type == SMBShareType::Pipe
    }

    pub fn encrypts_data(&self) -> bool {
        self.share_flags.contains(SMBShareFlags::ENCRYPT_DATA)
    }

    pub fn is_continuously_available(&self) -> bool {
        self.capabilities.contains(SMBTreeCapabilities::CONTINUOUS_AVAILABILITY)
    }
}

/// A share on the session. `None` state means the tree id is unknown.
#[derive(Debug)]
pub struct Tree {
    share: String,
    state: RwLock<Option<ShareInfo>>,
}

impl Tree {
    pub fn new(share: impl Into<String>) -> Self {
        Self {
            share: share.into(),
            state: RwLock::new(None),
        }
    }

    pub fn share(&self) -> &str {
        &self.share
    }

    pub fn info(&self) -> Option<ShareInfo> {
        self.state.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn id(&self) -> Option<u32> {
        self.info().map(|info| info.tree_id)
    }

    pub fn security(&self, session: &Session) -> MessageSecurity {
        session.security(self.info().is_some_and(|info| info.encrypts_data()))
    }

    /// Connects (or reconnects) `\\server\share`.
    ///
    /// `sibling_encrypted` tells whether another share of the session is sealed,
    /// which seals this one too when the config couples share encryption.
    pub async fn connect(
        &self,
        connection: &Arc<Connection>,
        session: &Session,
        config: &SMBClientConfig,
        sibling_encrypted: bool,
    ) -> SMBResult<ShareInfo> {
        let parameters = connection.negotiated()?;
        let policy_encrypt = config.share_requires_encryption(&self.share)
            || (config.couple_share_encryption && sibling_encrypted);
        if policy_encrypt && (parameters.cipher.is_none() || session.keys().is_none()) {
            return Err(SMBError::auth_error(format!("Share {} requires encryption the session cannot provide", self.share)));
        }

        let request = SMBTreeConnectRequest::new(connection.server_name(), &self.share);
        let outgoing = OutgoingRequest::new(SMBBody::TreeConnectRequest(request), session.id(), 0)
            .secured(session.security(policy_encrypt));
        let exchange = connection.exchange(outgoing).await?.check("Tree connect failed")?;
        let tree_id = exchange.response.header.tree_id;
        let SMBBody::TreeConnectResponse(response) = exchange.response.body else {
            return Err(SMBError::parse_error("Tree connect succeeded without a response body"));
        };

        let mut share_flags = response.share_flags;
        if policy_encrypt && !share_flags.contains(SMBShareFlags::ENCRYPT_DATA) {
            debug!(share = %self.share, "sealing share by local policy");
            share_flags.insert(SMBShareFlags::ENCRYPT_DATA);
        }
        if share_flags.contains(SMBShareFlags::ENCRYPT_DATA) && parameters.cipher.is_none() {
            return Err(SMBError::auth_error("Server requires encryption on a dialect without a cipher"));
        }
        let info = ShareInfo {
            tree_id,
            share_type: response.share_type,
            share_flags,
            capabilities: response.capabilities,
            maximal_access: response.maximal_access,
        };
        *self.state.write().unwrap_or_else(|e| e.into_inner()) = Some(info.clone());
        info!(share = %self.share, tree_id, share_type = ?info.share_type, "tree connected");

        if matches!(parameters.dialect, SMBDialect::V3_0_0 | SMBDialect::V3_0_2)
            && session.keys().is_some()
            && connection.claim_negotiate_validation()
        {
            let validated = validate_negotiate(connection, session, &parameters, tree_id, info.encrypts_data()).await;
            if let Err(e) = validated {
                warn!(error = %e, "validate negotiate failed, dropping connection");
                connection.close().await;
                return Err(e);
            }
        }
        Ok(info)
    }

    /// Disconnects the tree. A tree whose id is unknown is left alone.
    pub async fn disconnect(&self, connection: &Arc<Connection>, session: &Session) -> SMBResult<()> {
        let Some(info) = self.state.write().unwrap_or_else(|e| e.into_inner()).take() else {
            return Ok(());
        };
        let outgoing = OutgoingRequest::new(SMBBody::TreeDisconnectRequest(SMBEmpty), session.id(), info.tree_id)
            .secured(session.security(info.encrypts_data()));
        connection.exchange(outgoing).await?.check("Tree disconnect failed")?;
        debug!(share = %self.share, tree_id = info.tree_id, "tree disconnected");
        Ok(())
    }

    /// Forgets the tree id after the session that owned it is gone.
    pub fn invalidate(&self) {
        self.state.write().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// FSCTL_VALIDATE_NEGOTIATE_INFO (MS-SMB2 3.2.5.14.12): the server must echo what it negotiated.
async fn validate_negotiate(
    connection: &Arc<Connection>,
    session: &Session,
    parameters: &NegotiatedParameters,
    tree_id: u32,
    encrypted: bool,
) -> SMBResult<()> {
    let input = ValidateNegotiateInfoRequest {
        capabilities: parameters.client_capabilities,
        guid: parameters.client_guid,
        security_mode: parameters.client_security_mode,
        dialects: parameters.offered_dialects.clone(),
    };
    let request = SMBIoCtlRequest::fsctl(SMBIoCtlCode::ValidateNegotiateInfo, SMB_IOCTL_NO_FILE, input.to_bytes(), VALIDATE_NEGOTIATE_OUTPUT_SIZE);
    let security = match session.security(encrypted) {
        MessageSecurity::Plain => MessageSecurity::Signed,
        security => security,
    };
    let outgoing = OutgoingRequest::new(SMBBody::IoCtlRequest(request), session.id(), tree_id).secured(security);
    let exchange = connection.exchange(outgoing).await?;
    match exchange.status() {
        NTStatus::StatusNotSupported | NTStatus::InvalidDeviceRequest => {
            debug!(status = ?exchange.status(), "server does not implement validate negotiate");
            return Ok(());
        }
        _ => {}
    }
    if !exchange.sealed && !exchange.response.is_signed() {
        return Err(SMBError::auth_error("Validate negotiate response was not signed"));
    }
    let exchange = exchange.check("Validate negotiate failed")?;
    let SMBBody::IoCtlResponse(response) = &exchange.response.body else {
        return Err(SMBError::parse_error("Validate negotiate without an ioctl response"));
    };
    let output = ValidateNegotiateInfoResponse::from_bytes(&response.output)?;
    if output.dialect != parameters.dialect
        || output.guid != parameters.server_guid
        || output.security_mode != parameters.server_security_mode
        || output.capabilities != parameters.server_capabilities
    {
        return Err(SMBError::auth_error("Validate negotiate does not match the negotiate response"));
    }
    debug!(dialect = ?parameters.dialect, "negotiate validated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::client::test_support::{established_session, negotiated_pair, parameters, session_keys, Peer, SESSION_ID};
    use crate::protocol::body::ioctl::SMBIoCtlResponse;
    use crate::protocol::body::negotiate::context::EncryptionCipher;
    use crate::protocol::body::session_setup::flags::SMBSessionFlags;
    use crate::protocol::body::tree_connect::SMBTreeConnectResponse;
    use crate::protocol::message::SMBMessage;
    use crate::util::crypto::seal::encrypt_message;
    use crate::util::crypto::smb2::sign_message;

    use super::*;

    fn tree_response(flags: SMBShareFlags) -> SMBBody {
        SMBBody::TreeConnectResponse(SMBTreeConnectResponse {
            share_type: SMBShareType::Disk,
            share_flags: flags,
            capabilities: SMBTreeCapabilities::empty(),
            maximal_access: SMBAccessMask::permissive(),
        })
    }

    async fn answer_tree_connect(peer: &mut Peer, tree_id: u32, flags: SMBShareFlags) -> SMBMessage {
        let request = peer.next().await;
        let mut header = request.header.create_response_header(NTStatus::StatusSuccess, 8);
        header.tree_id = tree_id;
        peer.send(SMBMessage::new(header, tree_response(flags))).await;
        request
    }

    #[tokio::test]
    async fn connect_records_share_and_builds_unc_path() {
        let config = SMBClientConfig::default();
        let (connection, mut peer, _events) = negotiated_pair(&config, parameters(SMBDialect::V2_1_0));
        let session = Session::new();
        let tree = Tree::new("data");
        let (info, request) = tokio::join!(
            tree.connect(&connection, &session, &config, false),
            answer_tree_connect(&mut peer, 5, SMBShareFlags::empty()),
        );
        let info = info.unwrap();
        let SMBBody::TreeConnectRequest(body) = &request.body else { panic!() };
        assert_eq!(body.path, "\\\\server\\data");
        assert_eq!(info.tree_id, 5);
        assert_eq!(tree.id(), Some(5));
        assert!(!info.encrypts_data());
    }

    /// A coupled sibling share seals this one even though the server did not ask.
    #[tokio::test]
    async fn local_policy_forces_share_encryption() {
        let config = SMBClientConfig { couple_share_encryption: true, ..Default::default() };
        let (connection, mut peer, _events) = negotiated_pair(&config, parameters(SMBDialect::V3_0_2));
        let session = established_session(&connection, &mut peer, &config, SMBSessionFlags::empty()).await;
        let keys = session_keys(SMBDialect::V3_0_2);
        let tree = Tree::new("public");
        let server = async {
            let (request, sealed) = peer.next_with(&keys, EncryptionCipher::AES128GCM).await;
            assert!(sealed);
            let mut header = request.header.create_response_header(NTStatus::StatusSuccess, 8);
            header.tree_id = 3;
            let bytes = SMBMessage::new(header, tree_response(SMBShareFlags::empty())).as_bytes();
            let sealed = encrypt_message(&bytes, SESSION_ID, &keys.decryption, EncryptionCipher::AES128GCM).unwrap();
            peer.writer.write_frame(&sealed).await.unwrap();

            let (ioctl, sealed) = peer.next_with(&keys, EncryptionCipher::AES128GCM).await;
            assert!(sealed);
            peer.reply_secured(&ioctl, NTStatus::StatusNotSupported, SMBBody::ErrorResponse(Default::default()), &keys, SMBDialect::V3_0_2, true).await;
        };
        let (info, _) = tokio::join!(tree.connect(&connection, &session, &config, true), server);
        let info = info.unwrap();
        assert!(info.encrypts_data());
        assert!(matches!(tree.security(&session), MessageSecurity::Sealed));
        assert!(connection.is_alive());
    }

    #[tokio::test]
    async fn policy_encryption_without_cipher_is_refused() {
        let config = SMBClientConfig { encrypted_shares: vec!["secure".into()], ..Default::default() };
        let (connection, _peer, _events) = negotiated_pair(&config, parameters(SMBDialect::V2_1_0));
        let tree = Tree::new("secure");
        let error = tree.connect(&connection, &Session::new(), &config, false).await.unwrap_err();
        assert!(matches!(error, SMBError::AuthError(_)));
        assert!(tree.id().is_none());
    }

    #[tokio::test]
    async fn disconnect_of_unknown_tree_is_a_no_op() {
        let config = SMBClientConfig::default();
        let (connection, _peer, _events) = negotiated_pair(&config, parameters(SMBDialect::V2_1_0));
        let tree = Tree::new("data");
        tree.disconnect(&connection, &Session::new()).await.unwrap();
        assert_eq!(connection.with_state(|state| state.ledger.outstanding()), 0);
    }

    #[tokio::test]
    async fn validate_negotiate_runs_once_and_detects_mismatch() {
        let config = SMBClientConfig::default();
        let negotiated = parameters(SMBDialect::V3_0_2);
        let expected = ValidateNegotiateInfoResponse {
            capabilities: negotiated.server_capabilities,
            guid: negotiated.server_guid,
            security_mode: negotiated.server_security_mode,
            dialect: SMBDialect::V3_0_0,
        };
        let (connection, mut peer, _events) = negotiated_pair(&config, negotiated);
        let session = established_session(&connection, &mut peer, &config, SMBSessionFlags::empty()).await;
        let keys = session_keys(SMBDialect::V3_0_2);
        let tree = Tree::new("data");
        let server = async {
            let (request, _) = peer.next_with(&keys, EncryptionCipher::AES128GCM).await;
            assert!(request.is_signed());
            let mut header = request.header.create_response_header(NTStatus::StatusSuccess, 8);
            header.tree_id = 9;
            let mut bytes = SMBMessage::new(header, tree_response(SMBShareFlags::empty())).as_bytes();
            sign_message(&keys.signing, connection.negotiated().unwrap().signing_algorithm, &mut bytes).unwrap();
            peer.writer.write_frame(&bytes).await.unwrap();

            let (ioctl, _) = peer.next_with(&keys, EncryptionCipher::AES128GCM).await;
            let SMBBody::IoCtlRequest(body) = &ioctl.body else { panic!() };
            assert_eq!(body.ctl_code, SMBIoCtlCode::ValidateNegotiateInfo);
            let input = ValidateNegotiateInfoRequest::from_bytes(&body.input).unwrap();
            assert_eq!(input.dialects, vec![SMBDialect::V3_0_2]);
            let response = SMBIoCtlResponse::new(SMBIoCtlCode::ValidateNegotiateInfo, SMB_IOCTL_NO_FILE, expected.to_bytes());
            peer.reply_secured(&ioctl, NTStatus::StatusSuccess, SMBBody::IoCtlResponse(response), &keys, SMBDialect::V3_0_2, false).await;
        };
        let (result, _) = tokio::join!(tree.connect(&connection, &session, &config, false), server);
        let error = result.unwrap_err();
        assert!(matches!(error, SMBError::AuthError(_)));
        assert!(!connection.is_alive());
        assert!(!connection.claim_negotiate_validation());
    }
}
