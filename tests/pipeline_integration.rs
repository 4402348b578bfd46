use anyhow::{anyhow, Result};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tempfile::tempdir;

use pallet_kiosk::upload::{HttpUploader, UploadHandle};
use pallet_kiosk::{
    CameraStatus, CaptureError, Kiosk, KioskConfig, PalletCode, PipelineEvent, Protocol,
    ReloadPolicy, StatusBoard, UploadError, UploadJob, UploadReceipt, Uploader,
};

#[derive(Clone, Debug)]
struct Recorded {
    method: String,
    target: String,
    authorization: Option<String>,
    body: Vec<u8>,
}

/// Camera snapshot endpoint and upload collector on one loopback listener.
///
/// - `GET /snapshot.jpg`: a small JPEG
/// - `GET /garbage`: 200 with a non-image body
/// - `GET /missing`: 404
/// - `POST /upload`: 200
/// - `POST /slow`: 200 after 3s when `cam=0`, immediately otherwise
/// - `POST /paced`: 200 after 100ms
struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl TestServer {
    fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let requests = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let requests_thread = requests.clone();
        let join = std::thread::spawn(move || {
            while !shutdown_thread.load(Ordering::SeqCst) {
                match listener.accept() {
                    Ok((stream, _)) => {
                        let requests = requests_thread.clone();
                        std::thread::spawn(move || {
                            let _ = handle_connection(stream, &requests);
                        });
                    }
                    Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                        std::thread::sleep(Duration::from_millis(10));
                    }
                    Err(_) => break,
                }
            }
        });

        Ok(Self {
            addr,
            requests,
            shutdown,
            join: Some(join),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().expect("requests lock").clone()
    }

    fn uploads(&self) -> Vec<Recorded> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "POST")
            .collect()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn handle_connection(stream: TcpStream, requests: &Mutex<Vec<Recorded>>) -> Result<()> {
    stream.set_nonblocking(false)?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut request_line = String::new();
    reader.read_line(&mut request_line)?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or("").to_string();
    let target = parts.next().unwrap_or("").to_string();

    let mut authorization = None;
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 || line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            match name.trim().to_ascii_lowercase().as_str() {
                "authorization" => authorization = Some(value.trim().to_string()),
                "content-length" => content_length = value.trim().parse()?,
                _ => {}
            }
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body)?;

    requests.lock().map_err(|_| anyhow!("lock"))?.push(Recorded {
        method: method.clone(),
        target: target.clone(),
        authorization,
        body,
    });

    let path = target.split('?').next().unwrap_or("");
    let mut stream = stream;
    match (method.as_str(), path) {
        ("GET", "/snapshot.jpg") => write_response(&mut stream, "200 OK", "image/jpeg", &jpeg()?),
        ("GET", "/garbage") => write_response(&mut stream, "200 OK", "text/plain", b"not a picture"),
        ("POST", "/upload") => write_response(&mut stream, "200 OK", "text/plain", b"stored"),
        ("POST", "/slow") => {
            if target.contains("cam=0") {
                std::thread::sleep(Duration::from_secs(3));
            }
            write_response(&mut stream, "200 OK", "text/plain", b"stored")
        }
        ("POST", "/paced") => {
            std::thread::sleep(Duration::from_millis(100));
            write_response(&mut stream, "200 OK", "text/plain", b"stored")
        }
        _ => write_response(&mut stream, "404 Not Found", "text/plain", b"no such thing"),
    }
}

fn write_response(stream: &mut TcpStream, status: &str, content_type: &str, body: &[u8]) -> Result<()> {
    write!(
        stream,
        "HTTP/1.1 {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        content_type,
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()?;
    Ok(())
}

fn jpeg() -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, 90)
        .encode_image(&image::RgbImage::from_pixel(32, 24, image::Rgb([10, 200, 30])))?;
    Ok(bytes)
}

fn config(dir: &std::path::Path, server_url: &str, slots: &[(&str, Protocol)]) -> Result<KioskConfig> {
    let mut cfg = KioskConfig::from_defaults()?;
    cfg.storage.dir = dir.to_path_buf();
    cfg.cameras.user = "admin".to_string();
    cfg.cameras.pass = "1234".to_string();
    cfg.upload.server_url = server_url.to_string();
    for (slot, (address, protocol)) in cfg.cameras.slots.iter_mut().zip(slots) {
        slot.address = address.to_string();
        slot.protocol = Some(*protocol);
    }
    Ok(cfg)
}

fn code(value: &str) -> PalletCode {
    PalletCode::new(value).expect("pallet code")
}

fn upload_events(events: &[PipelineEvent]) -> Vec<&PipelineEvent> {
    events
        .iter()
        .filter(|e| {
            matches!(
                e,
                PipelineEvent::UploadStarted { .. } | PipelineEvent::UploadFinished { .. }
            )
        })
        .collect()
}

fn assert_single_flight(events: &[PipelineEvent]) {
    let mut in_flight = false;
    for event in upload_events(events) {
        match event {
            PipelineEvent::UploadStarted { .. } => {
                assert!(!in_flight, "two uploads started without a finish in between");
                in_flight = true;
            }
            PipelineEvent::UploadFinished { .. } => in_flight = false,
            _ => {}
        }
    }
}

#[test]
fn http_slot_uploads_and_unreachable_stream_fails() -> Result<()> {
    let server = TestServer::start()?;
    let dir = tempdir()?;
    let snapshot_url = server.url("/snapshot.jpg");
    let cfg = config(
        dir.path(),
        &server.url("/upload"),
        &[
            (snapshot_url.as_str(), Protocol::Http),
            ("", Protocol::Rtsp),
            ("stub://unreachable-cam", Protocol::Rtsp),
        ],
    )?;
    let (tx, rx) = mpsc::channel();
    let mut kiosk = Kiosk::new(cfg, tx)?;

    let results = kiosk.run_round_at(&code("PAL001"), "20240131-0905");
    kiosk.shutdown(ReloadPolicy::Drain)?;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].slot_index, 0);
    assert!(results[0].is_success());
    assert_eq!(
        results[0].file_path,
        dir.path().join("PAL001_20240131-0905_0.jpg")
    );
    assert!(results[0].file_path.exists());
    assert_eq!(results[1].slot_index, 2);
    assert!(matches!(results[1].error, Some(CaptureError::Connect(_))));

    let snapshot = server
        .requests()
        .into_iter()
        .find(|r| r.method == "GET")
        .ok_or_else(|| anyhow!("no snapshot request"))?;
    assert_eq!(snapshot.authorization.as_deref(), Some("Basic YWRtaW46MTIzNA=="));

    let uploads = server.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].target, "/upload?sulabel=PAL001&cam=0&gate=2");
    let body = String::from_utf8_lossy(&uploads[0].body);
    assert!(body.contains(
        "Content-Disposition: form-data; name=\"photo\"; filename=\"PAL001_20240131-0905_0.jpg\""
    ));
    assert!(body.contains("Content-Type: image/jpeg"));

    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    assert_eq!(
        upload_events(&events),
        vec![
            &PipelineEvent::UploadStarted { round: 1, cam: 0 },
            &PipelineEvent::UploadFinished {
                round: 1,
                cam: 0,
                success: true,
                message: "OK".to_string()
            },
        ]
    );

    let mut board = StatusBoard::new();
    for event in &events {
        board.apply(event);
    }
    assert_eq!(board.get(0), Some(&CameraStatus::Ok("OK".to_string())));
    assert!(matches!(board.get(2), Some(CameraStatus::Error(msg)) if msg.starts_with("Connect Fail")));
    assert_eq!(board.get(1), Some(&CameraStatus::Idle));
    Ok(())
}

#[test]
fn snapshot_failures_never_reach_the_queue() -> Result<()> {
    let server = TestServer::start()?;
    let dir = tempdir()?;
    let missing_url = server.url("/missing");
    let garbage_url = server.url("/garbage");
    let cfg = config(
        dir.path(),
        &server.url("/upload"),
        &[
            (missing_url.as_str(), Protocol::Http),
            (garbage_url.as_str(), Protocol::Http),
            ("stub://blank", Protocol::Rtsp),
        ],
    )?;
    let (tx, rx) = mpsc::channel();
    let mut kiosk = Kiosk::new(cfg, tx)?;

    let results = kiosk.run_round_at(&code("PAL004"), "20240131-0905");
    kiosk.shutdown(ReloadPolicy::Drain)?;

    assert!(matches!(&results[0].error, Some(CaptureError::Network(msg)) if msg.contains("404")));
    assert!(matches!(results[1].error, Some(CaptureError::Decode(_))));
    assert!(matches!(results[2].error, Some(CaptureError::Decode(_))));
    assert!(server.uploads().is_empty());
    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    assert!(upload_events(&events).is_empty());
    Ok(())
}

#[test]
fn upload_timeout_fails_job_and_queue_advances() -> Result<()> {
    let server = TestServer::start()?;
    let dir = tempdir()?;
    let mut cfg = config(
        dir.path(),
        &server.url("/slow"),
        &[("stub://a", Protocol::Rtsp), ("stub://b", Protocol::Rtsp)],
    )?;
    cfg.upload.timeout = Duration::from_secs(1);
    cfg.cameras.max_workers = 1;
    let (tx, rx) = mpsc::channel();
    let mut kiosk = Kiosk::new(cfg, tx)?;

    kiosk.run_round_at(&code("PAL005"), "20240131-0905");
    kiosk.shutdown(ReloadPolicy::Drain)?;

    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    let uploads = upload_events(&events);
    assert_eq!(uploads.len(), 4);
    assert_eq!(uploads[0], &PipelineEvent::UploadStarted { round: 1, cam: 0 });
    assert!(matches!(
        uploads[1],
        PipelineEvent::UploadFinished { cam: 0, success: false, message, .. } if !message.is_empty()
    ));
    assert_eq!(uploads[2], &PipelineEvent::UploadStarted { round: 1, cam: 1 });
    assert!(matches!(
        uploads[3],
        PipelineEvent::UploadFinished { cam: 1, success: true, .. }
    ));
    Ok(())
}

#[test]
fn back_to_back_rounds_upload_in_submission_order() -> Result<()> {
    let server = TestServer::start()?;
    let dir = tempdir()?;
    let mut cfg = config(
        dir.path(),
        &server.url("/paced"),
        &[("stub://a", Protocol::Rtsp), ("stub://b", Protocol::Rtsp)],
    )?;
    cfg.cameras.max_workers = 1;
    let (tx, rx) = mpsc::channel();
    let mut kiosk = Kiosk::new(cfg, tx)?;

    kiosk.run_round_at(&code("PAL001"), "20240131-0905");
    kiosk.run_round_at(&code("PAL002"), "20240131-0905");
    kiosk.shutdown(ReloadPolicy::Drain)?;

    let targets: Vec<String> = server.uploads().into_iter().map(|r| r.target).collect();
    assert_eq!(
        targets,
        vec![
            "/paced?sulabel=PAL001&cam=0&gate=2",
            "/paced?sulabel=PAL001&cam=1&gate=2",
            "/paced?sulabel=PAL002&cam=0&gate=2",
            "/paced?sulabel=PAL002&cam=1&gate=2",
        ]
    );
    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    assert_single_flight(&events);
    Ok(())
}

#[test]
fn late_upload_does_not_mark_next_pallet_as_sent() -> Result<()> {
    let dir = tempdir()?;
    let frames = dir.path().join("frames");
    let cfg = config(&frames, "", &[("stub://a", Protocol::Rtsp)])?;
    let slow: Box<dyn Uploader> = Box::new(|_: &UploadJob| -> Result<UploadReceipt, UploadError> {
        std::thread::sleep(Duration::from_millis(500));
        Ok(UploadReceipt { status: 200 })
    });
    let (tx, rx) = mpsc::channel();
    let mut kiosk = Kiosk::with_uploader(cfg, tx, Some(slow))?;

    let first = kiosk.run_round_at(&code("PAL001"), "20240131-0905");
    assert!(first[0].is_success());
    // a regular file where the frame directory should be
    std::fs::remove_dir_all(&frames)?;
    std::fs::write(&frames, b"")?;
    let second = kiosk.run_round_at(&code("PAL002"), "20240131-0906");
    assert!(matches!(second[0].error, Some(CaptureError::DiskWrite(_))));
    kiosk.shutdown(ReloadPolicy::Drain)?;

    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    let second_round = events
        .iter()
        .position(|e| matches!(e, PipelineEvent::RoundStarted { round: 2, .. }))
        .ok_or_else(|| anyhow!("no second round"))?;
    let late_finish = events
        .iter()
        .position(|e| matches!(e, PipelineEvent::UploadFinished { round: 1, cam: 0, .. }))
        .ok_or_else(|| anyhow!("no upload for the first round"))?;
    assert!(late_finish > second_round);

    let mut board = StatusBoard::new();
    for event in &events {
        board.apply(event);
    }
    assert_eq!(board.round(), Some(2));
    assert!(matches!(board.get(0), Some(CameraStatus::Error(msg)) if msg.starts_with("Disk Write Error")));
    Ok(())
}

#[test]
fn repeated_round_overwrites_same_file() -> Result<()> {
    let dir = tempdir()?;
    let cfg = config(dir.path(), "", &[("stub://a", Protocol::Http)])?;
    let (tx, _rx) = mpsc::channel();
    let mut kiosk = Kiosk::new(cfg, tx)?;

    let first = kiosk.run_round_at(&code("PAL006"), "20240131-0905");
    let second = kiosk.run_round_at(&code("PAL006"), "20240131-0905");
    kiosk.shutdown(ReloadPolicy::Drain)?;

    assert!(first[0].is_success() && second[0].is_success());
    assert_eq!(first[0].file_path, second[0].file_path);
    let stored: Vec<PathBuf> = std::fs::read_dir(dir.path())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    assert_eq!(stored, vec![first[0].file_path.clone()]);
    Ok(())
}

#[test]
fn missing_file_reports_file_error_and_advances() -> Result<()> {
    let server = TestServer::start()?;
    let dir = tempdir()?;
    let cfg = config(dir.path(), &server.url("/upload"), &[])?;
    let present = dir.path().join("PAL007_20240131-0905_1.jpg");
    std::fs::write(&present, jpeg()?)?;

    let (tx, rx) = mpsc::channel();
    let handle = UploadHandle::spawn(Box::new(HttpUploader::new(&cfg.upload)?), tx)?;
    handle.submit(UploadJob {
        round: 1,
        file_path: dir.path().join("PAL007_20240131-0905_0.jpg"),
        pallet_code: code("PAL007"),
        cam_index: 0,
    });
    handle.submit(UploadJob {
        round: 1,
        file_path: present,
        pallet_code: code("PAL007"),
        cam_index: 1,
    });
    handle.stop(ReloadPolicy::Drain)?;

    let events: Vec<PipelineEvent> = rx.try_iter().collect();
    assert_eq!(
        events,
        vec![
            PipelineEvent::UploadStarted { round: 1, cam: 0 },
            PipelineEvent::UploadFinished {
                round: 1,
                cam: 0,
                success: false,
                message: "File Error".to_string()
            },
            PipelineEvent::UploadStarted { round: 1, cam: 1 },
            PipelineEvent::UploadFinished {
                round: 1,
                cam: 1,
                success: true,
                message: "OK".to_string()
            },
        ]
    );
    assert_eq!(server.uploads().len(), 1);
    Ok(())
}
