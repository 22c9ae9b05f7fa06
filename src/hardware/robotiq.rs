//! Robotiq 2F-85 Gripper Socket Driver
//!
//! The gripper's URCap exposes an ASCII protocol on TCP port 63352.
//!
//! Protocol Overview:
//! - Write: `SET <VAR> <VAL> [<VAR> <VAL> ...]\n`, answered with `ack`
//! - Read: `GET <VAR>\n`, answered with `<VAR> <VAL>`
//! - Timing: one outstanding request at a time
//!
//! Activation resets the gripper (`ACT 0`, `ATR 0`), requests `ACT 1`, and
//! waits until the status register `STA` reads 3.
//!
//! # Example Usage
//!
//! ```no_run
//! use tactile_daq::hardware::capabilities::GripperDriver;
//! use tactile_daq::hardware::robotiq::RobotiqDriver;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut driver = RobotiqDriver::connect("192.168.1.179", 63352, Duration::from_secs(2)).await?;
//!     driver.activate().await?;
//!     driver.command_move(255, 10, 5).await?;
//!     Ok(())
//! }
//! ```

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{GripperDriver, GripperRegister};
use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// Default port of the gripper socket server.
pub const DEFAULT_PORT: u16 = 63352;

/// Status register value of an activated gripper.
const STA_ACTIVATED: u8 = 3;

/// Driver for the Robotiq gripper socket interface
pub struct RobotiqDriver {
    stream: TcpStream,
    /// Per-transaction limit for the reply to arrive
    io_timeout: Duration,
    /// Limit for the activation handshake to complete
    activation_timeout: Duration,
    /// Delay between status reads while activating
    poll_interval: Duration,
    /// Requests that timed out before their reply was read
    stale_replies: usize,
}

impl RobotiqDriver {
    /// Open a connection to the gripper
    ///
    /// # Arguments
    /// * `host` - Controller address
    /// * `port` - Socket port, usually [`DEFAULT_PORT`]
    /// * `io_timeout` - Limit for connecting and for each request/reply
    ///
    /// # Errors
    /// Returns error if the connection cannot be established in time
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> AppResult<Self> {
        let stream = timeout(io_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| DaqError::Timeout {
                operation: format!("gripper connect to {}:{}", host, port),
                timeout: io_timeout,
            })?
            .map_err(|err| {
                DaqError::Instrument(format!(
                    "Failed to connect to gripper at {}:{}: {}",
                    host, port, err
                ))
            })?;
        stream.set_nodelay(true)?;
        info!(host, port, "gripper socket connected");

        Ok(Self {
            stream,
            io_timeout,
            activation_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(10),
            stale_replies: 0,
        })
    }

    /// Override the activation handshake limit
    pub fn with_activation_timeout(mut self, activation_timeout: Duration) -> Self {
        self.activation_timeout = activation_timeout;
        self
    }

    /// Drop replies to requests that timed out, so they are not read as the
    /// answer to the next request.
    ///
    /// The controller answers every request, so each timed-out request is
    /// given up to the I/O timeout for its late reply to arrive.
    async fn discard_stale(&mut self) -> AppResult<()> {
        let mut buf = [0u8; 1024];
        while self.stale_replies > 0 {
            self.stale_replies -= 1;
            match timeout(self.io_timeout, self.stream.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    return Err(DaqError::Instrument(
                        "Gripper closed the connection".to_string(),
                    ))
                }
                Ok(Ok(n)) => {
                    warn!(reply = %String::from_utf8_lossy(&buf[..n]).trim(), "discarded late gripper reply")
                }
                Ok(Err(err)) => return Err(err.into()),
                Err(_) => self.stale_replies = 0,
            }
        }

        loop {
            match self.stream.try_read(&mut buf) {
                Ok(0) => {
                    return Err(DaqError::Instrument(
                        "Gripper closed the connection".to_string(),
                    ))
                }
                Ok(n) => {
                    warn!(reply = %String::from_utf8_lossy(&buf[..n]).trim(), "discarded unsolicited gripper data")
                }
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Send one request and return the trimmed reply
    async fn transaction(&mut self, command: &str) -> AppResult<String> {
        self.discard_stale().await?;
        let operation = format!("gripper request '{}'", command);
        let io_timeout = self.io_timeout;
        let exchange = async {
            self.stream.write_all(command.as_bytes()).await?;
            self.stream.write_all(b"\n").await?;
            let mut buf = [0u8; 1024];
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(DaqError::Instrument(
                    "Gripper closed the connection".to_string(),
                ));
            }
            Ok(String::from_utf8_lossy(&buf[..n]).trim().to_string())
        };

        let reply = match timeout(io_timeout, exchange).await {
            Ok(reply) => reply?,
            Err(_) => {
                self.stale_replies += 1;
                return Err(DaqError::Timeout {
                    operation,
                    timeout: io_timeout,
                });
            }
        };
        debug!(command, reply = %reply, "gripper transaction");
        Ok(reply)
    }

    /// Write several registers in one request
    ///
    /// Returns whether the controller acknowledged.
    pub async fn set_vars(&mut self, vars: &[(GripperRegister, u8)]) -> AppResult<bool> {
        let mut command = String::from("SET");
        for (register, value) in vars {
            command.push_str(&format!(" {} {}", register, value));
        }
        Ok(self.transaction(&command).await? == "ack")
    }

    /// Read one register
    pub async fn get_var(&mut self, register: GripperRegister) -> AppResult<u8> {
        let reply = self.transaction(&format!("GET {}", register)).await?;
        parse_var_reply(&reply, register)
    }

    async fn wait_for(&mut self, register: GripperRegister, expected: u8) -> AppResult<()> {
        let deadline = Instant::now() + self.activation_timeout;
        while self.get_var(register).await? != expected {
            if Instant::now() >= deadline {
                return Err(DaqError::Timeout {
                    operation: format!("gripper waiting for {} == {}", register, expected),
                    timeout: self.activation_timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
        Ok(())
    }
}

/// Parse a `<VAR> <VAL>` reply
fn parse_var_reply(reply: &str, register: GripperRegister) -> AppResult<u8> {
    let mut parts = reply.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(name), Some(value), None) if name == register.as_str() => {
            value.parse().map_err(|_| {
                DaqError::Instrument(format!(
                    "Gripper register {} has invalid value '{}'",
                    register, value
                ))
            })
        }
        _ => Err(DaqError::Instrument(format!(
            "Unexpected reply to GET {}: '{}'",
            register, reply
        ))),
    }
}

#[async_trait]
impl GripperDriver for RobotiqDriver {
    async fn activate(&mut self) -> AppResult<()> {
        // Reset first so a faulted gripper can re-activate.
        self.set_vars(&[(GripperRegister::Act, 0), (GripperRegister::Atr, 0)])
            .await?;
        self.wait_for(GripperRegister::Sta, 0).await?;

        if !self.set_vars(&[(GripperRegister::Act, 1)]).await? {
            return Err(DaqError::Instrument(
                "Gripper refused activation request".to_string(),
            ));
        }
        self.wait_for(GripperRegister::Act, 1).await?;
        self.wait_for(GripperRegister::Sta, STA_ACTIVATED).await?;
        info!("gripper activation complete");
        Ok(())
    }

    async fn command_move(&mut self, position: u8, speed: u8, force: u8) -> AppResult<bool> {
        self.set_vars(&[
            (GripperRegister::Pos, position),
            (GripperRegister::Speed, speed),
            (GripperRegister::Force, force),
            (GripperRegister::Gto, 1),
        ])
        .await
    }

    async fn read(&mut self, register: GripperRegister) -> AppResult<u8> {
        self.get_var(register).await
    }

    async fn close(&mut self) -> AppResult<()> {
        self.stream.shutdown().await?;
        info!("gripper socket closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio::io::{AsyncBufReadExt, BufReader};
    use tokio::net::TcpListener;

    /// Minimal gripper socket server: SET stores, GET reports, ACT 1 activates.
    async fn spawn_fake_gripper() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut regs: HashMap<String, u8> = HashMap::new();
            regs.insert("STA".into(), 3);

            while let Ok(Some(line)) = lines.next_line().await {
                let tokens: Vec<&str> = line.split_whitespace().collect();
                let reply = match tokens.as_slice() {
                    ["SET", pairs @ ..] => {
                        for pair in pairs.chunks(2) {
                            let value: u8 = pair[1].parse().unwrap();
                            regs.insert(pair[0].to_string(), value);
                            match (pair[0], value) {
                                ("ACT", 0) => {
                                    regs.insert("STA".into(), 0);
                                }
                                ("ACT", 1) => {
                                    regs.insert("STA".into(), 3);
                                }
                                ("POS", pos) => {
                                    regs.insert("PRE".into(), pos);
                                }
                                _ => {}
                            }
                        }
                        "ack".to_string()
                    }
                    ["GET", name] => format!("{} {}", name, regs.get(*name).copied().unwrap_or(0)),
                    _ => "?".to_string(),
                };
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        });
        port
    }

    #[tokio::test]
    async fn test_activation_and_move() {
        let port = spawn_fake_gripper().await;
        let mut driver = RobotiqDriver::connect("127.0.0.1", port, Duration::from_secs(1))
            .await
            .unwrap();

        driver.activate().await.unwrap();
        assert_eq!(driver.read(GripperRegister::Sta).await.unwrap(), 3);

        assert!(driver.command_move(180, 10, 7).await.unwrap());
        assert_eq!(driver.read(GripperRegister::Pre).await.unwrap(), 180);
        assert_eq!(driver.read(GripperRegister::Force).await.unwrap(), 7);
        driver.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = RobotiqDriver::connect("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_late_reply_is_not_read_as_next_answer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut served: u8 = 0;
            while let Ok(Some(_)) = lines.next_line().await {
                served += 1;
                if served == 1 {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                }
                let reply = format!("POS {}", served);
                write.write_all(reply.as_bytes()).await.unwrap();
            }
        });

        let mut driver = RobotiqDriver::connect("127.0.0.1", port, Duration::from_millis(150))
            .await
            .unwrap();
        assert!(matches!(
            driver.get_var(GripperRegister::Pos).await,
            Err(DaqError::Timeout { .. })
        ));
        assert_eq!(driver.get_var(GripperRegister::Pos).await.unwrap(), 2);
    }

    #[test]
    fn test_parse_var_reply() {
        assert_eq!(parse_var_reply("POS 42", GripperRegister::Pos).unwrap(), 42);
        assert!(parse_var_reply("OBJ 2", GripperRegister::Pos).is_err());
        assert!(parse_var_reply("POS x", GripperRegister::Pos).is_err());
        assert!(parse_var_reply("ack", GripperRegister::Pos).is_err());
    }
}
