//! Scanner input threads.
//!
//! A keyboard-wedge scanner types into the controlling terminal, so keyboard mode
//! reads stdin. Serial mode reads a USB VCP / Bluetooth SPP device configured as
//! raw 8N1 at the configured baud rate and reopens it after a disconnect.
//! Both feed a `TriggerNormalizer` and forward complete codes over a channel.
//!
//! Stdin has a single reader thread for the whole process. Keyboard handles
//! attach their channel to it and detach on stop, so switching input modes never
//! strands a line in a retired reader.

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::io::{self, BufRead, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::config::{ScannerSettings, ScannerSource};
use crate::trigger::{InputMode, PalletCode, RawInput, TriggerNormalizer};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const READ_CHUNK: usize = 256;

type KeyboardRoute = Mutex<Option<Sender<PalletCode>>>;

/// Where the stdin reader delivers codes; `None` while no keyboard handle is live.
static KEYBOARD_ROUTE: KeyboardRoute = Mutex::new(None);
static KEYBOARD_READER: AtomicBool = AtomicBool::new(false);

pub struct ScannerHandle {
    source: ScannerSource,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ScannerHandle {
    /// Start reading from `settings.source`, sending each code to `codes`.
    pub fn spawn(settings: &ScannerSettings, codes: Sender<PalletCode>) -> Result<Self> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let source = settings.source.clone();
        let join = match &source {
            ScannerSource::Keyboard => {
                log::info!("scanner: keyboard mode (stdin)");
                start_keyboard_reader()?;
                *route(&KEYBOARD_ROUTE) = Some(codes);
                None
            }
            ScannerSource::Serial(path) => {
                log::info!("scanner: serial {} @ {} baud", path.display(), settings.baud);
                let shutdown = shutdown.clone();
                let path = path.clone();
                let baud = settings.baud;
                let join = std::thread::Builder::new()
                    .name("scanner-serial".into())
                    .spawn(move || read_serial(&path, baud, codes, &shutdown))
                    .context("spawn serial scanner thread")?;
                Some(join)
            }
        };
        Ok(Self {
            source,
            shutdown,
            join,
        })
    }

    pub fn source(&self) -> &ScannerSource {
        &self.source
    }

    /// Stop reading. A keyboard handle detaches from the shared stdin reader,
    /// which keeps running; a serial reader is joined.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if self.source == ScannerSource::Keyboard {
            route(&KEYBOARD_ROUTE).take();
        }
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("serial scanner thread panicked"))?;
        }
        Ok(())
    }
}

fn route(route: &KeyboardRoute) -> MutexGuard<'_, Option<Sender<PalletCode>>> {
    match route.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn start_keyboard_reader() -> Result<()> {
    if KEYBOARD_READER.swap(true, Ordering::SeqCst) {
        return Ok(());
    }
    let spawned = std::thread::Builder::new()
        .name("scanner-kbd".into())
        .spawn(|| read_keyboard(io::stdin().lock(), &KEYBOARD_ROUTE));
    if let Err(err) = spawned {
        KEYBOARD_READER.store(false, Ordering::SeqCst);
        return Err(err).context("spawn keyboard scanner thread");
    }
    Ok(())
}

/// Feed keystrokes from a line-buffered reader until EOF, delivering each code to
/// whichever channel is attached to `codes` at the time. Codes read while nothing
/// is attached are dropped.
fn read_keyboard<R: BufRead>(mut reader: R, codes: &KeyboardRoute) {
    let mut normalizer = TriggerNormalizer::new(InputMode::Keyboard);
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                log::info!("scanner: keyboard input closed");
                return;
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("scanner: keyboard read failed: {}", err);
                return;
            }
        }
        for key in line.chars() {
            let Some(code) = normalizer.feed(RawInput::Key(key)) else {
                continue;
            };
            let mut target = route(codes);
            match target.as_ref() {
                Some(tx) => {
                    log::debug!("KBD: input -> {}", code);
                    if tx.send(code).is_err() {
                        target.take();
                    }
                }
                None => log::debug!("KBD: keyboard input inactive; ignoring {}", code),
            }
        }
    }
}

fn read_serial(path: &Path, baud: u32, codes: Sender<PalletCode>, shutdown: &AtomicBool) {
    let mut normalizer = TriggerNormalizer::new(InputMode::SerialPort);
    while !shutdown.load(Ordering::SeqCst) {
        match open_port(path, baud) {
            Ok(port) => {
                log::info!("scanner: serial port {} open", path.display());
                match pump_serial(port, &mut normalizer, &codes, shutdown) {
                    Ok(PumpEnd::Shutdown) | Ok(PumpEnd::ReceiverGone) => return,
                    Ok(PumpEnd::Eof) => log::warn!("scanner: serial input ended (EOF)"),
                    Err(err) => log::warn!("scanner: serial input ended: {:#}", err),
                }
                // partial code from the broken connection is not resumed
                normalizer.set_mode(InputMode::SerialPort);
            }
            Err(err) => log::warn!("scanner: serial device unavailable: {:#}", err),
        }
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        log::info!(
            "scanner: reconnecting to {} in {}s",
            path.display(),
            RECONNECT_DELAY.as_secs()
        );
        std::thread::sleep(RECONNECT_DELAY);
    }
}

enum PumpEnd {
    Eof,
    Shutdown,
    ReceiverGone,
}

fn pump_serial(
    port: SerialPort,
    normalizer: &mut TriggerNormalizer,
    codes: &Sender<PalletCode>,
    shutdown: &AtomicBool,
) -> Result<PumpEnd> {
    let SerialPort { mut file, is_tty } = port;
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(PumpEnd::Shutdown);
        }
        let read = match file.read(&mut chunk) {
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err).context("read serial chunk"),
        };
        if read == 0 {
            // tty reads time out with zero bytes; anything else is a real EOF
            if is_tty {
                continue;
            }
            return Ok(PumpEnd::Eof);
        }
        if let Some(code) = normalizer.feed(RawInput::Bytes(&chunk[..read])) {
            log::debug!("SERIAL: input -> {}", code);
            if codes.send(code).is_err() {
                return Ok(PumpEnd::ReceiverGone);
            }
        }
    }
}

struct SerialPort {
    file: File,
    is_tty: bool,
}

fn open_port(path: &Path, baud: u32) -> Result<SerialPort> {
    let file = File::open(path)
        .with_context(|| format!("failed to open serial device {}", path.display()))?;
    let is_tty = configure_port(&file, baud)
        .with_context(|| format!("configure serial device {}", path.display()))?;
    Ok(SerialPort { file, is_tty })
}

/// Raw 8N1 at `baud`, reads returning at least every half second.
/// Returns `false` when the path is not a terminal (FIFO, plain file).
#[cfg(target_os = "linux")]
fn configure_port(file: &File, baud: u32) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let speed = baud_constant(baud)?;
    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid open descriptor owned by `file`; termios is plain data.
    unsafe {
        let mut tio: libc::termios = std::mem::zeroed();
        if libc::tcgetattr(fd, &mut tio) != 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ENOTTY) {
                return Ok(false);
            }
            return Err(err).context("tcgetattr");
        }
        libc::cfmakeraw(&mut tio);
        tio.c_cflag |= libc::CLOCAL | libc::CREAD;
        tio.c_cflag &= !(libc::CSTOPB | libc::PARENB);
        tio.c_cc[libc::VMIN] = 0;
        tio.c_cc[libc::VTIME] = 5;
        if libc::cfsetispeed(&mut tio, speed) != 0 || libc::cfsetospeed(&mut tio, speed) != 0 {
            return Err(io::Error::last_os_error()).context("set baud rate");
        }
        if libc::tcsetattr(fd, libc::TCSANOW, &tio) != 0 {
            return Err(io::Error::last_os_error()).context("tcsetattr");
        }
    }
    Ok(true)
}

#[cfg(not(target_os = "linux"))]
fn configure_port(_file: &File, baud: u32) -> Result<bool> {
    log::warn!(
        "scanner: line settings not applied on this platform; expecting {} baud",
        baud
    );
    Ok(false)
}

#[cfg(target_os = "linux")]
fn baud_constant(baud: u32) -> Result<libc::speed_t> {
    Ok(match baud {
        1200 => libc::B1200,
        2400 => libc::B2400,
        4800 => libc::B4800,
        9600 => libc::B9600,
        19200 => libc::B19200,
        38400 => libc::B38400,
        57600 => libc::B57600,
        115200 => libc::B115200,
        other => return Err(anyhow!("unsupported baud rate {}", other)),
    })
}
