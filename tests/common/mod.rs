#![allow(dead_code)]

pub mod sync;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{Error, ErrorKind};
use std::rc::Rc;
use std::time::Duration;

use weatherbus_proto::master::io::{Bus, Clock, Config, Master};

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Everything the driver did to the bus, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum BusEvent {
    Begin(u32),
    TxBegin,
    Write(Vec<u8>),
    TxEnd,
    Flush,
    Delay(Duration),
    RxEnable,
    RxDisable,
}

/// Scripted bus with a virtual clock.
///
/// Every call to `Clock::now` advances time by `tick`, so a poll loop with
/// nothing to read reaches its timeout after `timeout / tick` iterations.
pub struct SimState {
    pub now: Duration,
    pub tick: Duration,
    pub events: Vec<(Duration, BusEvent)>,
    pub tx: Vec<u8>,
    /// Bytes to deliver, with their arrival time relative to enabling the receiver.
    pub rx: VecDeque<(Duration, u8)>,
    pub rx_enabled: bool,
    pub rx_enabled_at: Duration,
    pub do_write_error: bool,
    pub do_read_error: bool,
}

impl SimState {
    fn log(&mut self, event: BusEvent) {
        let now = self.now;
        self.events.push((now, event));
    }
}

pub struct SimBus(Rc<RefCell<SimState>>);

pub struct SimClock(Rc<RefCell<SimState>>);

#[derive(Clone)]
pub struct Sim(Rc<RefCell<SimState>>);

impl Sim {
    pub fn new() -> Sim {
        Sim(Rc::new(RefCell::new(SimState {
            now: Duration::from_millis(0),
            tick: Duration::from_millis(1),
            events: Vec::new(),
            tx: Vec::new(),
            rx: VecDeque::new(),
            rx_enabled: false,
            rx_enabled_at: Duration::from_millis(0),
            do_write_error: false,
            do_read_error: false,
        })))
    }

    pub fn master(&self) -> Master<SimBus, SimClock> {
        self.master_with(Config::default())
    }

    pub fn master_with(&self, config: Config) -> Master<SimBus, SimClock> {
        Master::with_clock(SimBus(self.0.clone()), SimClock(self.0.clone()), config)
    }

    /// Deliver `data` one byte per tick, starting as the receiver is enabled.
    pub fn respond(&self, data: &[u8]) {
        self.respond_at(Duration::from_millis(0), data);
    }

    pub fn respond_at(&self, start: Duration, data: &[u8]) {
        let mut state = self.0.borrow_mut();
        let tick = state.tick;
        let mut at = start;
        for byte in data {
            state.rx.push_back((at, *byte));
            at += tick;
        }
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.0.borrow().events.iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn timed_events(&self) -> Vec<(Duration, BusEvent)> {
        self.0.borrow().events.clone()
    }

    pub fn tx(&self) -> Vec<u8> {
        self.0.borrow().tx.clone()
    }

    pub fn now(&self) -> Duration {
        self.0.borrow().now
    }

    pub fn rx_enabled(&self) -> bool {
        self.0.borrow().rx_enabled
    }

    pub fn pending_rx(&self) -> usize {
        self.0.borrow().rx.len()
    }

    pub fn clear(&self) {
        let mut state = self.0.borrow_mut();
        state.events.clear();
        state.tx.clear();
        state.rx.clear();
    }

    pub fn trigger_write_error(&self) {
        self.0.borrow_mut().do_write_error = true;
    }

    pub fn trigger_read_error(&self) {
        self.0.borrow_mut().do_read_error = true;
    }
}

impl Bus for SimBus {
    fn begin(&mut self, baud_rate: u32) -> std::io::Result<()> {
        self.0.borrow_mut().log(BusEvent::Begin(baud_rate));
        Ok(())
    }

    fn begin_transmission(&mut self) -> std::io::Result<()> {
        self.0.borrow_mut().log(BusEvent::TxBegin);
        Ok(())
    }

    fn write(&mut self, data: &[u8]) -> std::io::Result<()> {
        let mut inner = self.0.borrow_mut();
        if inner.do_write_error {
            inner.do_write_error = false;
            return Err(Error::new(ErrorKind::BrokenPipe, "IO write error"));
        }
        inner.log(BusEvent::Write(data.to_vec()));
        inner.tx.extend_from_slice(data);
        Ok(())
    }

    fn end_transmission(&mut self) -> std::io::Result<()> {
        self.0.borrow_mut().log(BusEvent::TxEnd);
        Ok(())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.0.borrow_mut().log(BusEvent::Flush);
        Ok(())
    }

    fn receive(&mut self) -> std::io::Result<()> {
        let mut inner = self.0.borrow_mut();
        inner.rx_enabled = true;
        inner.rx_enabled_at = inner.now;
        inner.log(BusEvent::RxEnable);
        Ok(())
    }

    fn no_receive(&mut self) -> std::io::Result<()> {
        let mut inner = self.0.borrow_mut();
        inner.rx_enabled = false;
        inner.log(BusEvent::RxDisable);
        Ok(())
    }

    fn available(&mut self) -> std::io::Result<bool> {
        let inner = self.0.borrow();
        let elapsed = inner.now - inner.rx_enabled_at;
        Ok(inner.rx_enabled && inner.rx.front().map_or(false, |(at, _)| *at <= elapsed))
    }

    fn read(&mut self) -> std::io::Result<Option<u8>> {
        let mut inner = self.0.borrow_mut();
        if inner.do_read_error {
            inner.do_read_error = false;
            return Err(Error::new(ErrorKind::PermissionDenied, "IO read error"));
        }
        if !inner.rx_enabled {
            return Ok(None);
        }
        Ok(inner.rx.pop_front().map(|(_, byte)| byte))
    }
}

impl Clock for SimClock {
    fn now(&mut self) -> Duration {
        let mut inner = self.0.borrow_mut();
        let tick = inner.tick;
        inner.now += tick;
        inner.now
    }

    fn delay(&mut self, duration: Duration) {
        let mut inner = self.0.borrow_mut();
        inner.log(BusEvent::Delay(duration));
        inner.now += duration;
    }
}
