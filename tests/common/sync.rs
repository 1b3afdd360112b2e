//! A threaded RS485 line, connecting one master interface to one node
//! interface. The node side is plain blocking `Read`/`Write`.

use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::SeqCst;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use weatherbus_proto::master::io::Bus;

type BusT = Mutex<VecDeque<u8>>;

#[derive(Default)]
pub struct Rs485Line {
    to_master: BusT,
    to_node: BusT,
    node_data_available: Condvar,
    master_listening: AtomicBool,
    eof: AtomicBool,
}

impl Rs485Line {
    pub fn new() -> Arc<Rs485Line> {
        Default::default()
    }

    pub fn disconnect(&self) {
        self.eof.store(true, SeqCst);
        self.node_data_available.notify_all();
    }

    pub fn master_interface(self: &Arc<Self>) -> MasterInterface {
        MasterInterface {
            line: Arc::clone(self),
            transmitting: false,
        }
    }

    pub fn node_interface(self: &Arc<Self>) -> NodeInterface {
        NodeInterface {
            line: Arc::clone(self),
            timeout: Duration::from_millis(100),
        }
    }
}

pub struct MasterInterface {
    line: Arc<Rs485Line>,
    transmitting: bool,
}

impl Bus for MasterInterface {
    fn begin(&mut self, _baud_rate: u32) -> std::io::Result<()> {
        Ok(())
    }

    fn begin_transmission(&mut self) -> std::io::Result<()> {
        self.transmitting = true;
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        if !self.transmitting {
            return Err(Error::new(ErrorKind::Other, "write without transmit session"));
        }
        self.line.to_node.lock().unwrap().extend(data.iter().copied());
        self.line.node_data_available.notify_all();
        Ok(())
    }

    fn end_transmission(&mut self) -> std::io::Result<()> {
        self.transmitting = false;
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }

    fn receive(&mut self) -> std::io::Result<()> {
        self.line.master_listening.store(true, SeqCst);
        Ok(())
    }

    fn no_receive(&mut self) -> std::io::Result<()> {
        self.line.master_listening.store(false, SeqCst);
        self.line.to_master.lock().unwrap().clear();
        Ok(())
    }

    fn available(&mut self) -> std::io::Result<bool> {
        Ok(!self.line.to_master.lock().unwrap().is_empty())
    }

    fn read(&mut self) -> std::io::Result<Option<u8>> {
        Ok(self.line.to_master.lock().unwrap().pop_front())
    }
}

pub struct NodeInterface {
    line: Arc<Rs485Line>,
    pub timeout: Duration,
}

impl std::io::Read for NodeInterface {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if buf.is_empty() {
            panic!("Testsuite called read with zero length buffer.")
        }
        let rx = self.line.to_node.lock().expect("Read mutex is poisoned");
        let mut rx = self
            .line
            .node_data_available
            .wait_timeout_while(rx, self.timeout, |rx| {
                rx.is_empty() && !self.line.eof.load(SeqCst)
            })
            .expect("Mutex lock failed")
            .0;
        if let Some(byte) = rx.pop_front() {
            buf[0] = byte;
            Ok(1)
        } else if self.line.eof.load(SeqCst) {
            Ok(0)
        } else {
            Err(Error::new(ErrorKind::TimedOut, "IO read timeout"))
        }
    }
}

impl std::io::Write for NodeInterface {
    /// Waits for the master to listen, up to `timeout`. Bytes sent while the
    /// master isn't listening are lost, as on a real half-duplex line.
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let deadline = Instant::now() + self.timeout;
        while !self.line.master_listening.load(SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_micros(100));
        }
        if self.line.master_listening.load(SeqCst) {
            self.line.to_master.lock().unwrap().extend(buf.iter().copied());
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
