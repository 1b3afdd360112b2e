use anyhow::{Context, Result};
use std::io::Write;
use std::iter::Peekable;
use std::str::{FromStr, SplitWhitespace};
use std::sync::mpsc;

use weatherbus_proto::master::io::Master;
use weatherbus_proto::serial::{DriverEnable, SerialBus};
use weatherbus_proto::{Channel, IntoChannel, Quantity};

type WeatherBus = Master<SerialBus>;

fn print_value(channel: Channel, value: f32) {
    match channel.quantity() {
        Some(q) => println!("{} {} {}", q, value, q.unit()),
        None => println!("{} {}", channel, value),
    }
}

fn cmd_read(args: &mut CmdScanner, bus: &mut WeatherBus) -> Result<()> {
    let channel = args.next_channel()?;
    print_value(channel, bus.query(channel)?);
    Ok(())
}

fn cmd_poll(args: &mut CmdScanner, bus: &mut WeatherBus) -> Result<()> {
    let channel = args.next_channel()?;
    let delay = std::time::Duration::from_secs_f32(args.parse_next()?);

    println!("Press enter to stop polling.");
    // check that the first read is ok before starting the poll stop thread
    print_value(channel, bus.query(channel)?);
    let (io_tx, io_rx) = mpsc::channel::<()>();
    std::thread::spawn(move || {
        let _ch = io_tx;
        let mut buf = String::new();
        let _ = std::io::stdin().read_line(&mut buf);
    });
    loop {
        if io_rx.recv_timeout(delay) == Err(mpsc::RecvTimeoutError::Disconnected) {
            break;
        }
        match bus.query(channel) {
            Ok(value) => print_value(channel, value),
            Err(err) => println!("{}", err),
        }
    }
    Ok(())
}

fn cmd_all(bus: &mut WeatherBus) -> Result<()> {
    for q in Quantity::ALL.iter() {
        match bus.query(q.channel()) {
            Ok(value) => print_value(q.channel(), value),
            Err(err) => println!("{}: {}", q, err),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::init();

    let mut args = std::env::args();
    args.next(); // Skip program name
    let port = args.next().unwrap_or_else(|| "/dev/ttyUSB0".to_string());
    let baud_rate: u32 = match args.next() {
        Some(baud) => baud.parse().context("Invalid baud rate")?,
        None => weatherbus_proto::master::io::DEFAULT_BAUD_RATE,
    };

    let serial = SerialBus::open(&port, baud_rate, DriverEnable::Rts)
        .with_context(|| format!("Failed to open serial port {}", port))?;
    let mut bus = Master::new(serial);
    bus.begin(baud_rate)?;

    let mut stdout = std::io::stdout();
    loop {
        print!(">> ");
        stdout.flush()?;
        let mut cmd = String::new();
        let mut scan = CmdScanner::read_stdin(&mut cmd)?;
        if let Err(err) = match scan.next() {
            Err(_) => continue,
            Ok("read") | Ok("r") => cmd_read(&mut scan, &mut bus),
            Ok("poll") => cmd_poll(&mut scan, &mut bus),
            Ok("all") => cmd_all(&mut bus),
            Ok("quit") | Ok("q") => break,
            Ok(cmd) => {
                println!("Unknown command {}", cmd);
                continue;
            }
        } {
            println!("{:?}", err)
        }
    }
    Ok(())
}

struct CmdScanner<'a> {
    splt: Peekable<SplitWhitespace<'a>>,
}

impl<'a> CmdScanner<'a> {
    fn read_stdin(buf: &'a mut String) -> Result<Self> {
        buf.clear();
        std::io::stdin().read_line(buf)?;
        let splt = buf.split_whitespace().peekable();
        Ok(Self { splt })
    }
    fn next(&mut self) -> Result<&str> {
        self.splt.next().context("End of stream")
    }
    fn parse_next<T: FromStr>(&mut self) -> Result<T> {
        self.next()?.parse::<T>().ok().context("Parse error")
    }
    fn next_channel(&mut self) -> Result<Channel> {
        let code = self.parse_next::<char>()?;
        Ok(code.into_channel()?)
    }
}
