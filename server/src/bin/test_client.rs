use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{debug, info, warn};
use shared::{
    Channel, Command, Packet, ReliableReceiver, ReliableSender, ServerReply, DEFAULT_PORT,
    MAX_DATAGRAM_SIZE, PROTOCOL_VERSION,
};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

const RESEND_INTERVAL: Duration = Duration::from_millis(200);
const CONNECT_ATTEMPTS: u32 = 5;

#[derive(Parser, Debug)]
#[command(author, version, about = "Sends one protocol command to the account server")]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value_t = format!("127.0.0.1:{}", DEFAULT_PORT))]
    server: String,

    /// Seconds to wait for the server
    #[arg(short, long, default_value = "3")]
    timeout_secs: u64,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Create an account
    Create { username: String, password: String },
    /// Log in to an account
    Login { username: String, password: String },
    /// Acknowledge a state change
    Ack { state: String },
}

impl Action {
    fn into_command(self) -> Command {
        match self {
            Action::Create { username, password } => Command::CreateAccount {
                username,
                credential: password,
            },
            Action::Login { username, password } => Command::Login {
                username,
                credential: password,
            },
            Action::Ack { state } => Command::StateAck {
                reported_state: state,
            },
        }
    }
}

async fn send_packet(
    socket: &UdpSocket,
    packet: &Packet,
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error>> {
    socket.send_to(&packet.to_bytes()?, addr).await?;
    Ok(())
}

async fn connect(
    socket: &UdpSocket,
    server_addr: SocketAddr,
) -> Result<u32, Box<dyn std::error::Error>> {
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    for attempt in 1..=CONNECT_ATTEMPTS {
        info!("Sending connection request to {} (attempt {})", server_addr, attempt);
        let connect = Packet::Connect {
            client_version: PROTOCOL_VERSION,
        };
        send_packet(socket, &connect, server_addr).await?;

        let deadline = Instant::now() + Duration::from_secs(1);
        while let Some(remaining) = deadline.checked_duration_since(Instant::now()) {
            let Ok(received) = timeout(remaining, socket.recv_from(&mut buf)).await else {
                break;
            };
            let (len, _) = received?;
            match Packet::from_bytes(&buf[..len]) {
                Ok(Packet::Accepted { connection_id }) => return Ok(connection_id),
                Ok(Packet::Disconnected { reason }) => return Err(reason.into()),
                Ok(other) => debug!("Ignoring {:?} while connecting", other),
                Err(e) => warn!("Failed to deserialize response: {}", e),
            }
        }
    }

    Err("server did not accept the connection".into())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let server_addr: SocketAddr = args.server.parse()?;
    let command = args.action.into_command();
    let text = command.encode().ok_or("command has no wire form")?;
    let expects_reply = !matches!(command, Command::StateAck { .. });

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    info!("Client socket bound to {}", socket.local_addr()?);

    let connection_id = connect(&socket, server_addr).await?;
    info!("Connection accepted with id {}", connection_id);

    let mut sender = ReliableSender::new();
    let mut receiver = ReliableReceiver::new();
    let mut buf = [0u8; MAX_DATAGRAM_SIZE];

    info!("Sending {:?}", text);
    let packet = sender.push(text.into_bytes(), Instant::now())?;
    send_packet(&socket, &packet, server_addr).await?;

    let deadline = Instant::now() + Duration::from_secs(args.timeout_secs);
    let mut done = false;

    while !done && Instant::now() < deadline {
        let received = match timeout(RESEND_INTERVAL, socket.recv_from(&mut buf)).await {
            Ok(received) => received?,
            Err(_) => {
                for packet in sender.due_for_resend(Instant::now(), RESEND_INTERVAL) {
                    send_packet(&socket, &packet, server_addr).await?;
                }
                continue;
            }
        };

        let (len, _) = received;
        let packet = match Packet::from_bytes(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Failed to deserialize packet: {}", e);
                continue;
            }
        };

        match packet {
            Packet::Ack { sequence } => {
                sender.acknowledge(sequence);
                if !expects_reply && sender.in_flight() == 0 {
                    done = true;
                }
            }
            Packet::Data {
                channel,
                sequence,
                payload,
            } => {
                let payloads = match channel {
                    Channel::ReliableOrdered if receiver.is_beyond_window(sequence) => {
                        debug!("Ignoring sequence {} beyond the window", sequence);
                        continue;
                    }
                    Channel::ReliableOrdered => {
                        send_packet(&socket, &Packet::Ack { sequence }, server_addr).await?;
                        receiver.receive(sequence, payload)
                    }
                    Channel::UnreliableUnordered => vec![payload],
                };

                for payload in payloads {
                    let text = String::from_utf8_lossy(&payload);
                    match ServerReply::parse(&text) {
                        Ok(reply) => println!("{}", reply),
                        Err(_) => println!("{}", text),
                    }
                    if expects_reply {
                        done = true;
                    }
                }
            }
            Packet::Heartbeat => {
                send_packet(&socket, &Packet::Heartbeat, server_addr).await?;
            }
            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                return Ok(());
            }
            other => debug!("Unexpected packet: {:?}", other),
        }
    }

    if !done {
        warn!("No answer from the server within {}s", args.timeout_secs);
    }

    send_packet(&socket, &Packet::Disconnect, server_addr).await?;
    info!("Test client finished");
    Ok(())
}
