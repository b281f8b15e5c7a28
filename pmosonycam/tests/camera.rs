use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mockito::{Matcher, Mock, Server, ServerGuard};
use pmosonycam::{Camera, CameraConfig, CameraError, DiscoveryConfig, RpcErrorKind};
use serde_json::{Value, json};

const DESCRIPTION_PATH: &str = "/DmsRmtDesc.xml";
const CAMERA_PATH: &str = "/sony/camera";

fn description(services: &[(&str, &str)]) -> String {
    let services: String = services
        .iter()
        .map(|(service_type, url)| {
            format!(
                "<av:X_ScalarWebAPI_Service>\
                   <av:X_ScalarWebAPI_ServiceType>{}</av:X_ScalarWebAPI_ServiceType>\
                   <av:X_ScalarWebAPI_ActionList_URL>{}</av:X_ScalarWebAPI_ActionList_URL>\
                 </av:X_ScalarWebAPI_Service>",
                service_type, url
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0" xmlns:av="urn:schemas-sony-com:av">
  <device>
    <friendlyName>DSC-QX10</friendlyName>
    <av:X_ScalarWebAPI_DeviceInfo>
      <av:X_ScalarWebAPI_Version>1.0</av:X_ScalarWebAPI_Version>
      <av:X_ScalarWebAPI_ServiceList>{}</av:X_ScalarWebAPI_ServiceList>
    </av:X_ScalarWebAPI_DeviceInfo>
  </device>
</root>"#,
        services
    )
}

/// Description exposing `camera`, `guide` and `system` on the mock server.
fn mock_description(server: &mut ServerGuard) -> Mock {
    let sony = format!("{}/sony", server.url());
    server
        .mock("GET", DESCRIPTION_PATH)
        .with_status(200)
        .with_header("content-type", "text/xml; charset=\"utf-8\"")
        .with_body(description(&[
            ("guide", sony.as_str()),
            ("camera", sony.as_str()),
            ("system", sony.as_str()),
        ]))
        .create()
}

fn mock_call(server: &mut ServerGuard, method: &str, response: Value) -> Mock {
    expect_call(server, method, response, 1)
}

fn expect_call(server: &mut ServerGuard, method: &str, response: Value, hits: usize) -> Mock {
    server
        .mock("POST", CAMERA_PATH)
        .match_body(Matcher::PartialJson(
            json!({"method": method, "id": 1, "version": "1.0"}),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(response.to_string())
        .expect(hits)
        .create()
}

fn mock_api_list(server: &mut ServerGuard, apis: &[&str]) -> Mock {
    mock_call(
        server,
        "getAvailableApiList",
        json!({"result": [apis], "id": 1}),
    )
}

fn location(server: &ServerGuard) -> String {
    format!("{}{}", server.url(), DESCRIPTION_PATH)
}

fn connect(server: &ServerGuard) -> Camera {
    Camera::connect_to(&location(server), &CameraConfig::default()).unwrap()
}

/// Répondeur SSDP pointant vers la description servie par mockito.
fn spawn_ssdp_responder(location: String) -> (SocketAddr, JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let addr = socket.local_addr().unwrap();

    let handle = thread::spawn(move || {
        let mut buf = [0u8; 2048];
        let (_, from) = socket.recv_from(&mut buf).unwrap();
        let reply = format!("HTTP/1.1 200 OK\r\nLOCATION: {}\r\n\r\n", location);
        socket.send_to(reply.as_bytes(), from).unwrap();
    });

    (addr, handle)
}

fn config_for(ssdp: SocketAddr) -> CameraConfig {
    CameraConfig {
        discovery: DiscoveryConfig {
            multicast_address: ssdp.to_string(),
            ..DiscoveryConfig::default()
        },
        ..CameraConfig::default()
    }
}

/// Lit une requête HTTP sur `stream` et y répond avec `body`.
fn answer(stream: TcpStream, body: &str) {
    let mut reader = BufReader::new(stream);

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap();
            }
        }
    }
    let mut request_body = vec![0u8; content_length];
    reader.read_exact(&mut request_body).unwrap();

    let mut stream = reader.into_inner();
    write!(
        stream,
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
    .unwrap();
    stream.flush().unwrap();
}

/// Serveur HTTP minimal qui répond une seule fois puis ferme son port.
fn serve_once(body: String) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        answer(stream, &body);
    });

    (url, handle)
}

/// Répond une fois, puis accepte la connexion suivante sans jamais répondre,
/// comme une caméra occupée par une prise de vue.
fn serve_then_stall(body: String, stall: Duration) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());

    let handle = thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        answer(stream, &body);

        let (_stalled, _) = listener.accept().unwrap();
        thread::sleep(stall);
    });

    (url, handle)
}

#[test]
fn test_connect_to_reads_description_and_api_list() {
    let mut server = Server::new();
    let description = mock_description(&mut server);
    let api_list = mock_api_list(&mut server, &["getVersions", "startRecMode", "actTakePicture"]);
    let rec_mode = expect_call(&mut server, "startRecMode", json!({"result": [0], "id": 1}), 0);

    let camera = connect(&server);

    description.assert();
    api_list.assert();
    rec_mode.assert();

    assert_eq!(camera.name(), "DSC-QX10");
    assert_eq!(camera.api_version(), "1.0");
    assert_eq!(camera.endpoint(), format!("{}{}", server.url(), CAMERA_PATH));
    assert!(camera.has_api("actTakePicture"));
    assert!(!camera.has_api("startMovieRec"));
}

#[test]
fn test_info() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["getVersions", "actTakePicture"]);

    let info = connect(&server).info();

    assert_eq!(info.name, "DSC-QX10");
    assert_eq!(info.api_version, "1.0");
    let mut services = info.supported_services.clone();
    services.sort();
    assert_eq!(services, vec!["camera", "guide", "system"]);
    assert_eq!(info.available_apis, vec!["getVersions", "actTakePicture"]);
}

#[test]
fn test_open_through_ssdp_switches_to_rec_mode() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["getVersions", "startRecMode"]);
    let rec_mode = expect_call(&mut server, "startRecMode", json!({"result": [0], "id": 1}), 1);

    let (ssdp, responder) = spawn_ssdp_responder(location(&server));
    let camera = Camera::open(&config_for(ssdp)).unwrap();
    responder.join().unwrap();

    rec_mode.assert();
    assert_eq!(camera.name(), "DSC-QX10");
}

#[test]
fn test_open_without_rec_mode_api() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["getVersions"]);
    let rec_mode = expect_call(&mut server, "startRecMode", json!({"result": [0], "id": 1}), 0);

    let (ssdp, responder) = spawn_ssdp_responder(location(&server));
    Camera::open(&config_for(ssdp)).unwrap();
    responder.join().unwrap();

    rec_mode.assert();
}

#[test]
fn test_auto_rec_mode_can_be_disabled() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["startRecMode"]);
    let rec_mode = expect_call(&mut server, "startRecMode", json!({"result": [0], "id": 1}), 0);

    let (ssdp, responder) = spawn_ssdp_responder(location(&server));
    let config = CameraConfig {
        auto_rec_mode: false,
        ..config_for(ssdp)
    };
    let camera = Camera::open(&config).unwrap();
    responder.join().unwrap();
    rec_mode.assert();

    assert!(camera.has_api("startRecMode"));
}

#[test]
fn test_rec_mode_failure_aborts_open() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["startRecMode"]);
    mock_call(
        &mut server,
        "startRecMode",
        json!({"error": [500, "Operation Failed"], "id": 1}),
    );

    let (ssdp, responder) = spawn_ssdp_responder(location(&server));
    let err = Camera::open(&config_for(ssdp)).err().unwrap();
    responder.join().unwrap();

    assert_eq!(err.rpc_kind(), Some(RpcErrorKind::OperationFailed));
}

#[test]
fn test_init_rec_mode_reports_whether_it_ran() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["startRecMode"]);
    mock_call(&mut server, "startRecMode", json!({"result": [0], "id": 1}));

    assert!(connect(&server).init_rec_mode().unwrap());
}

#[test]
fn test_call_normalizes_results() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["setShootMode", "getShootMode", "getEvent"]);
    mock_call(&mut server, "setShootMode", json!({"result": [], "id": 1}));
    mock_call(&mut server, "getShootMode", json!({"result": ["still"], "id": 1}));
    mock_call(
        &mut server,
        "getEvent",
        json!({"result": [{"type": "availableApiList"}, null], "id": 1}),
    );

    let camera = connect(&server);
    assert_eq!(camera.call_with("setShootMode", "still").unwrap(), json!(true));
    assert_eq!(camera.call("getShootMode").unwrap(), json!("still"));
    assert_eq!(
        camera.call_with("getEvent", json!([false])).unwrap(),
        json!([{"type": "availableApiList"}, null])
    );
}

#[test]
fn test_scalar_param_is_sent_as_list() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["setShootMode"]);
    let set = server
        .mock("POST", CAMERA_PATH)
        .match_body(Matcher::Json(json!({
            "method": "setShootMode",
            "params": ["movie"],
            "id": 1,
            "version": "1.0"
        })))
        .with_body(r#"{"result":[0],"id":1}"#)
        .create();

    let camera = connect(&server);
    assert_eq!(camera.call_with("setShootMode", "movie").unwrap(), json!(0));
    set.assert();
}

#[test]
fn test_illegal_argument() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["setIsoSpeedRate"]);
    mock_call(
        &mut server,
        "setIsoSpeedRate",
        json!({"error": [3, "bad", "value"], "id": 1}),
    );

    let err = connect(&server)
        .call_with("setIsoSpeedRate", json!({"iso": 99999}))
        .unwrap_err();

    assert_eq!(err.rpc_kind(), Some(RpcErrorKind::IllegalArgument));
    let message = err.to_string();
    assert!(message.contains("value"), "{}", message);
    assert!(message.contains(r#"{"iso":99999}"#), "{}", message);
}

#[test]
fn test_unknown_method_is_invalid_action() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["getVersions"]);
    mock_call(
        &mut server,
        "nonexistentMethod",
        json!({"error": [12, "No Such Method"], "id": 1}),
    );

    let err = connect(&server).call("nonexistentMethod").unwrap_err();
    assert_eq!(err.rpc_kind(), Some(RpcErrorKind::InvalidAction));
    assert_eq!(err.to_string(), "Invalid action: No Such Method");
}

#[test]
fn test_missing_camera_service() {
    let mut server = Server::new();
    let system = format!("{}/sony", server.url());
    server
        .mock("GET", DESCRIPTION_PATH)
        .with_body(description(&[("system", system.as_str())]))
        .create();

    let err = Camera::connect_to(&location(&server), &CameraConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, CameraError::MissingService(s) if s == "camera"));
}

#[test]
fn test_description_not_found() {
    let mut server = Server::new();
    server.mock("GET", DESCRIPTION_PATH).with_status(404).create();

    let err = Camera::connect_to(&location(&server), &CameraConfig::default())
        .err()
        .unwrap();
    assert!(matches!(err, CameraError::Http(_)));
}

#[test]
fn test_connected_on_any_http_answer() {
    let mut server = Server::new();
    mock_description(&mut server);
    mock_api_list(&mut server, &["getVersions"]);
    let camera = connect(&server);

    // Pas de mock GET : mockito répond 501, la caméra reste joignable
    assert!(camera.connected());
    assert!(camera.probe().unwrap());
}

#[test]
fn test_not_connected_once_endpoint_is_gone() {
    let (endpoint, http) = serve_once(r#"{"result":[["getVersions"]],"id":1}"#.to_string());

    let mut server = Server::new();
    server
        .mock("GET", DESCRIPTION_PATH)
        .with_body(description(&[("camera", endpoint.as_str())]))
        .create();

    let camera = Camera::connect_to(&location(&server), &CameraConfig::default()).unwrap();
    http.join().unwrap();

    assert_eq!(camera.available_apis(), ["getVersions"]);
    assert!(!camera.connected());
    assert!(!camera.probe().unwrap());
}

#[test]
fn test_busy_camera_is_still_connected() {
    let (endpoint, http) = serve_then_stall(
        r#"{"result":[["getVersions"]],"id":1}"#.to_string(),
        Duration::from_secs(2),
    );

    let mut server = Server::new();
    server
        .mock("GET", DESCRIPTION_PATH)
        .with_body(description(&[("camera", endpoint.as_str())]))
        .create();

    let camera = Camera::connect_to(&location(&server), &CameraConfig::default()).unwrap();

    // La connexion est acceptée mais la réponse n'arrive jamais
    let start = Instant::now();
    assert!(camera.probe().unwrap());
    assert!(start.elapsed() < Duration::from_secs(2), "{:?}", start.elapsed());

    http.join().unwrap();
}
