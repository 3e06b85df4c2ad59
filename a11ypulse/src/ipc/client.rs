use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;

use anyhow::{bail, Context, Result};

use a11ypulse_ipc::{Command, EventFilter, Response, StreamMessage, SubscribeRequest};

pub struct IpcClient {
    stream: TcpStream,
}

impl IpcClient {
    pub fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .with_context(|| format!("Failed to connect to a11ypulse daemon at {}", addr))?;
        Ok(Self { stream })
    }

    pub fn send(&mut self, cmd: &Command) -> Result<Response> {
        let json = serde_json::to_string(cmd)?;
        writeln!(self.stream, "{}", json)?;
        self.stream.flush()?;

        let mut reader = BufReader::new(&self.stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        if line.is_empty() {
            bail!("Daemon closed the connection");
        }

        let response: Response = serde_json::from_str(&line)?;
        Ok(response)
    }
}

/// Client for the telemetry event stream
pub struct EventClient {
    reader: BufReader<TcpStream>,
}

impl EventClient {
    pub fn connect(addr: &str, request: &SubscribeRequest) -> Result<Self> {
        let mut stream = TcpStream::connect(addr)
            .with_context(|| format!("Failed to connect to a11ypulse event server at {}", addr))?;

        // Send subscribe request
        let json = serde_json::to_string(request)?;
        writeln!(stream, "{}", json)?;
        stream.flush()?;

        let reader = BufReader::new(stream);
        Ok(Self { reader })
    }

    /// Read the next message (blocking). `None` once the daemon closes the stream.
    pub fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&line)?))
    }
}

/// Subscribe and print messages to stdout
pub fn subscribe_and_print(addr: &str, snapshot: bool, filter: EventFilter) -> Result<()> {
    let request = SubscribeRequest { snapshot, filter };
    let mut client = EventClient::connect(addr, &request)?;

    while let Some(message) = client.next_message()? {
        println!("{}", serde_json::to_string(&message)?);
    }

    Ok(())
}
