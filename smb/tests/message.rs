use smb_client::protocol::body::empty::SMBEmpty;
use smb_client::protocol::body::SMBBody;
use smb_client::protocol::header::{SMBCommandCode, SMBFlags, SMBSyncHeader, SMB2_HEADER_SIZE};
use smb_client::protocol::message::SMBMessage;
use smb_client::socket::message_stream::{read_frame, SMBFrameCodec, SMBSocketConnection};

#[test]
fn test_as_bytes_empty_body() {
    let header = SMBSyncHeader::request(SMBCommandCode::Echo, 0, 0, 0);
    let message = SMBMessage::new(header, SMBBody::EchoRequest(SMBEmpty));

    let bytes = message.as_bytes();

    assert_eq!(bytes[0..4], [0xFE, b'S', b'M', b'B']);
    // Echo carries only its 4-byte structure.
    assert_eq!(bytes.len(), SMB2_HEADER_SIZE + 4);
}

#[test]
fn test_as_bytes_consistency() {
    let message1 = SMBMessage::request(SMBBody::EchoRequest(SMBEmpty), 5, 1);
    let message2 = SMBMessage::request(SMBBody::EchoRequest(SMBEmpty), 5, 1);

    let bytes1 = message1.as_bytes();
    let bytes2 = message2.as_bytes();

    assert_eq!(bytes1, bytes2, "Byte representations should be identical for the same message content");
    assert!(!message1.is_signed());
}

#[test]
fn test_as_bytes_serialization_deserialization() {
    let mut header = SMBSyncHeader::request(SMBCommandCode::Echo, 9, 3, 0x44);
    header.flags |= SMBFlags::REPLAY_OPERATION;
    header.channel_sequence = 2;
    let original_message = SMBMessage::new(header, SMBBody::EchoRequest(SMBEmpty));

    let serialized = original_message.as_bytes();
    let (remaining, deserialized_message) = SMBMessage::parse(&serialized).unwrap();

    assert!(remaining.is_empty());
    assert_eq!(original_message, deserialized_message);
}

#[tokio::test]
async fn test_frames_survive_a_stream() {
    let (client, server) = tokio::io::duplex(1024);
    let (_, mut writer) = SMBSocketConnection::new("client", client, SMBFrameCodec::default()).into_streams();
    let (mut reader, _) = SMBSocketConnection::new("server", server, SMBFrameCodec::default()).into_streams();

    let first = SMBMessage::request(SMBBody::EchoRequest(SMBEmpty), 1, 0);
    let second = SMBMessage::request(SMBBody::LogoffRequest(SMBEmpty), 1, 0);
    writer.write_frame(&first.as_bytes()).await.unwrap();
    writer.write_frame(&second.as_bytes()).await.unwrap();

    let frame = read_frame(&mut reader).await.unwrap().unwrap();
    assert_eq!(SMBMessage::parse(&frame).unwrap().1, first);
    let frame = read_frame(&mut reader).await.unwrap().unwrap();
    assert_eq!(SMBMessage::parse(&frame).unwrap().1.header.command, SMBCommandCode::LogOff);
}
