//! End-to-end dispatch scenarios over encoded client frames.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use meridian_core::{
    ClusterError, Context, Dispatcher, ErrorCode, ErrorPayload, HandlerReturn, JsonSerializer,
    Pipeline, Registry, Serializer, ServiceBuilder, Session,
};
use meridian_proto::{Message, MessageCodec, MessageKind, RouteDictionary};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct JoinReq {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct JoinResp {
    ok: bool,
}

#[derive(Default)]
struct Room {
    joins: AtomicUsize,
    ticks: AtomicUsize,
}

fn room_service(room: Arc<Room>) -> meridian_core::Service<JsonSerializer> {
    ServiceBuilder::new("Room", room)
        .request("Join", |room: Arc<Room>, _ctx, _req: JoinReq| async move {
            room.joins.fetch_add(1, Ordering::SeqCst);
            Ok(JoinResp { ok: true })
        })
        .notify_noarg("Tick", |room: Arc<Room>, _ctx| async move {
            room.ticks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .request_raw("Panic", panicking_handler)
        .build()
        .unwrap()
}

async fn panicking_handler(
    _room: Arc<Room>,
    _ctx: Context,
    _payload: Vec<u8>,
) -> Result<Vec<u8>, ClusterError> {
    panic!("room exploded")
}

fn dispatcher_with(room: Arc<Room>, pipeline: Pipeline, codec: MessageCodec) -> Dispatcher<JsonSerializer> {
    let mut registry = Registry::new();
    registry.register(room_service(room)).unwrap();
    Dispatcher::new(registry, JsonSerializer, pipeline).with_codec(codec)
}

fn dispatcher(room: Arc<Room>) -> Dispatcher<JsonSerializer> {
    dispatcher_with(room, Pipeline::new(), MessageCodec::new())
}

fn decode_error(codec: &MessageCodec, frame: &[u8]) -> (u64, ErrorPayload) {
    let message = codec.decode(frame).unwrap();
    assert_eq!(message.kind, MessageKind::Response);
    assert!(message.err);
    (message.id, JsonSerializer.unmarshal(&message.data).unwrap())
}

#[tokio::test]
async fn local_request_roundtrip() {
    let room = Arc::new(Room::default());
    let dispatcher = dispatcher(room.clone());
    let codec = MessageCodec::new();

    let frame = codec
        .encode(&Message::request(1, "Room.Join", br#"{"name":"A"}"#.to_vec()))
        .unwrap();
    // Uncompressed request: kind bits zero, no flag bits set.
    assert_eq!(frame[0], 0x00);

    let session = Arc::new(Session::new(1, "u1"));
    let response = dispatcher
        .dispatch_frame(Context::new(), Some(session), &frame)
        .await
        .unwrap()
        .expect("requests produce a response frame");

    let message = codec.decode(&response).unwrap();
    assert_eq!(message.kind, MessageKind::Response);
    assert_eq!(message.id, 1);
    assert!(!message.err);
    assert_eq!(message.data, br#"{"ok":true}"#);
    assert_eq!(room.joins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn request_for_notify_handler_aborts() {
    let room = Arc::new(Room::default());
    let dispatcher = dispatcher(room.clone());
    let codec = MessageCodec::new();

    let frame = codec
        .encode(&Message::request(2, "Room.Tick", Vec::new()))
        .unwrap();
    let response = dispatcher
        .dispatch_frame(Context::new(), None, &frame)
        .await
        .unwrap()
        .unwrap();

    let (id, payload) = decode_error(&codec, &response);
    assert_eq!(id, 2);
    assert_eq!(payload.code, ErrorCode::RequestOnNotify.as_str());
    assert_eq!(room.ticks.load(Ordering::SeqCst), 0, "handler not invoked");
}

#[tokio::test]
async fn notify_for_request_handler_continues() {
    let room = Arc::new(Room::default());
    let dispatcher = dispatcher(room.clone());
    let codec = MessageCodec::new();

    let frame = codec
        .encode(&Message::notify("Room.Join", br#"{"name":"A"}"#.to_vec()))
        .unwrap();
    let response = dispatcher
        .dispatch_frame(Context::new(), None, &frame)
        .await
        .unwrap();

    // Dispatch continues; the produced response is discarded on the
    // notify path.
    assert!(response.is_none());
    assert_eq!(room.joins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn compressed_route_dispatches() {
    let dict = RouteDictionary::new();
    dict.install(HashMap::from([("Room.Join".to_owned(), 7u16)]))
        .unwrap();
    let codec = MessageCodec::new().with_dictionary(Arc::new(dict));

    let room = Arc::new(Room::default());
    let dispatcher = dispatcher_with(room.clone(), Pipeline::new(), codec.clone());

    // flag = Request | route-compressed, id = 1, dictionary code 0x0007.
    let mut frame = vec![0x01, 0x01, 0x00, 0x07];
    frame.extend_from_slice(br#"{"name":"A"}"#);

    let response = dispatcher
        .dispatch_frame(Context::new(), None, &frame)
        .await
        .unwrap()
        .unwrap();

    let message = codec.decode(&response).unwrap();
    assert_eq!(message.data, br#"{"ok":true}"#);
    assert_eq!(room.joins.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_route_is_not_found_without_side_effects() {
    let room = Arc::new(Room::default());
    let dispatcher = dispatcher(room.clone());
    let codec = MessageCodec::new();

    let frame = codec
        .encode(&Message::request(9, "Room.Missing", Vec::new()))
        .unwrap();
    let response = dispatcher
        .dispatch_frame(Context::new(), None, &frame)
        .await
        .unwrap()
        .unwrap();

    let (_, payload) = decode_error(&codec, &response);
    assert_eq!(payload.code, ErrorCode::NotFound.as_str());
    assert_eq!(room.joins.load(Ordering::SeqCst), 0);
    assert_eq!(room.ticks.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn before_hook_error_short_circuits_invocation() {
    let room = Arc::new(Room::default());
    let second_hook_runs = Arc::new(AtomicUsize::new(0));
    let counter = second_hook_runs.clone();

    let pipeline = Pipeline::new()
        .before(|_ctx, _arg| Err(ClusterError::new(ErrorCode::BadRequest, "blocked")))
        .before(move |_ctx, arg| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(arg)
        });
    let dispatcher = dispatcher_with(room.clone(), pipeline, MessageCodec::new());
    let codec = MessageCodec::new();

    let frame = codec
        .encode(&Message::request(3, "Room.Join", br#"{"name":"A"}"#.to_vec()))
        .unwrap();
    let response = dispatcher
        .dispatch_frame(Context::new(), None, &frame)
        .await
        .unwrap()
        .unwrap();

    let (_, payload) = decode_error(&codec, &response);
    assert_eq!(payload.code, ErrorCode::BadRequest.as_str());
    assert_eq!(payload.msg, "blocked");
    assert_eq!(second_hook_runs.load(Ordering::SeqCst), 0);
    assert_eq!(room.joins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn after_hook_error_overrides_handler_outcome() {
    let room = Arc::new(Room::default());
    let pipeline = Pipeline::new().after(|_ctx, _ret, err| {
        // Handler succeeded; the hook still gets to veto.
        assert!(err.is_none());
        (
            HandlerReturn::None,
            Some(ClusterError::new(ErrorCode::Internal, "vetoed")),
        )
    });
    let dispatcher = dispatcher_with(room.clone(), pipeline, MessageCodec::new());
    let codec = MessageCodec::new();

    let frame = codec
        .encode(&Message::request(4, "Room.Join", br#"{"name":"A"}"#.to_vec()))
        .unwrap();
    let response = dispatcher
        .dispatch_frame(Context::new(), None, &frame)
        .await
        .unwrap()
        .unwrap();

    let (_, payload) = decode_error(&codec, &response);
    assert_eq!(payload.code, ErrorCode::Internal.as_str());
    assert_eq!(payload.msg, "vetoed");
    assert_eq!(room.joins.load(Ordering::SeqCst), 1, "handler still ran");
}

#[tokio::test]
async fn undecodable_payload_is_bad_request() {
    let room = Arc::new(Room::default());
    let dispatcher = dispatcher(room.clone());
    let codec = MessageCodec::new();

    let frame = codec
        .encode(&Message::request(5, "Room.Join", b"not json".to_vec()))
        .unwrap();
    let response = dispatcher
        .dispatch_frame(Context::new(), None, &frame)
        .await
        .unwrap()
        .unwrap();

    let (_, payload) = decode_error(&codec, &response);
    assert_eq!(payload.code, ErrorCode::BadRequest.as_str());
    assert_eq!(room.joins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn handler_panic_is_reported_as_internal() {
    let room = Arc::new(Room::default());
    let dispatcher = dispatcher(room);
    let codec = MessageCodec::new();

    let frame = codec
        .encode(&Message::request(6, "Room.Panic", Vec::new()))
        .unwrap();
    let response = dispatcher
        .dispatch_frame(Context::new(), None, &frame)
        .await
        .unwrap()
        .unwrap();

    let (_, payload) = decode_error(&codec, &response);
    assert_eq!(payload.code, ErrorCode::Internal.as_str());
    assert!(payload.msg.contains("room exploded"));
}

#[tokio::test]
async fn push_frames_are_not_dispatchable() {
    let room = Arc::new(Room::default());
    let dispatcher = dispatcher(room);
    let codec = MessageCodec::new();

    let frame = codec
        .encode(&Message::push("Room.Join", Vec::new()))
        .unwrap();
    let err = dispatcher
        .dispatch_frame(Context::new(), None, &frame)
        .await
        .unwrap_err();
    assert!(err.is(ErrorCode::WrongMessageType));
}
