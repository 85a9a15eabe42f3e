//! End-to-end discovery scenarios over an in-process loopback transport.
//!
//! A scripted "access concentrator" task holds the other end of the
//! wire and answers (or ignores) the client's packets. Timeout
//! scenarios run under paused time so the exponential backoff is
//! exercised without waiting for it.

use pppoec::discovery::{
    Discovery, DiscoveryConfig, DiscoveryOutcome, DiscoveryState, LcpMru,
};
use pppoec::protocol::ethernet::{Frame, FrameBuilder};
use pppoec::protocol::pppoe::{codes, tags, PppoeBuilder, PppoeFrame, PPPOE_DISCOVERY_ETHERTYPE};
use pppoec::protocol::MacAddr;
use pppoec::transport::Transport;
use pppoec::{Error, Result};
use std::time::Duration;
use tokio::sync::mpsc;

const CLIENT: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);
const AC1: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x02]);
const AC2: MacAddr = MacAddr([0x02, 0x00, 0x00, 0x00, 0x00, 0x03]);

/// Client end of the loopback wire
struct ChannelTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl Transport for ChannelTransport {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.rx.recv().await {
            Some(frame) => {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                Ok(n)
            }
            // A hung-up peer is a silent line, not an I/O error
            None => std::future::pending().await,
        }
    }

    async fn send(&mut self, buf: &[u8]) -> Result<usize> {
        let _ = self.tx.send(buf.to_vec());
        Ok(buf.len())
    }
}

/// Access concentrator end of the loopback wire
struct AcEnd {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
}

fn wire() -> (ChannelTransport, AcEnd) {
    let (client_tx, ac_rx) = mpsc::unbounded_channel();
    let (ac_tx, client_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            tx: client_tx,
            rx: client_rx,
        },
        AcEnd {
            tx: ac_tx,
            rx: ac_rx,
        },
    )
}

fn discovery_frame(dst: MacAddr, src: MacAddr, pppoe: Vec<u8>) -> Vec<u8> {
    FrameBuilder::new()
        .dst_mac(dst)
        .src_mac(src)
        .ethertype(PPPOE_DISCOVERY_ETHERTYPE)
        .payload(&pppoe)
        .build()
}

fn pado(ac_name: &[u8]) -> PppoeBuilder {
    PppoeBuilder::discovery()
        .code(codes::PADO)
        .tag(tags::AC_NAME, ac_name)
        .service_name_any()
}

fn pads(session: u16) -> PppoeBuilder {
    PppoeBuilder::discovery()
        .code(codes::PADS)
        .session_id(session)
        .service_name_any()
}

/// An AC that offers "isp1" and confirms with the given session id,
/// echoing Host-Uniq when present.
async fn simple_ac(mut end: AcEnd, mac: MacAddr, session: u16) {
    while let Some(frame) = end.rx.recv().await {
        let eth = Frame::parse(&frame).unwrap();
        let pppoe = PppoeFrame::parse(eth.payload()).unwrap();
        let uniq = pppoe.find_tag(tags::HOST_UNIQ);

        let reply = match pppoe.code() {
            codes::PADI => pado(b"isp1"),
            codes::PADR => pads(session),
            _ => continue,
        };
        let reply = match uniq {
            Some(uniq) => reply.host_uniq(uniq),
            None => reply,
        };
        let _ = end.tx.send(discovery_frame(eth.src_mac(), mac, reply.build()));
    }
}

#[tokio::test]
async fn happy_path_reaches_session() {
    let (transport, ac) = wire();
    tokio::spawn(simple_ac(ac, AC1, 0x1234));

    let mut disc = Discovery::new(transport, CLIENT, DiscoveryConfig::default());
    let outcome = disc.run().await.unwrap();

    assert_eq!(outcome, DiscoveryOutcome::Established);
    assert_eq!(disc.state(), DiscoveryState::Session);
    assert_eq!(disc.session_id(), 0x1234);
    assert_eq!(disc.peer_mac(), AC1);
}

#[tokio::test]
async fn selects_ac_by_configured_name() {
    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        let frame = ac.rx.recv().await.unwrap(); // PADI
        let eth = Frame::parse(&frame).unwrap();
        let client = eth.src_mac();
        ac.tx
            .send(discovery_frame(client, AC1, pado(b"isp1").build()))
            .unwrap();
        ac.tx
            .send(discovery_frame(client, AC2, pado(b"isp2").build()))
            .unwrap();

        let frame = ac.rx.recv().await.unwrap(); // PADR
        let eth = Frame::parse(&frame).unwrap();
        assert_eq!(eth.dst_mac(), AC2, "PADR must go to the matching AC");
        ac.tx
            .send(discovery_frame(client, AC2, pads(0x0042).build()))
            .unwrap();
    });

    let mut disc = Discovery::new(
        transport,
        CLIENT,
        DiscoveryConfig {
            ac_name: Some("isp2".into()),
            ..Default::default()
        },
    );
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);
    assert_eq!(disc.peer_mac(), AC2);
    script.await.unwrap();
}

#[tokio::test]
async fn padr_echoes_cookie_and_relay_id() {
    let cookie: [u8; 16] = [
        0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0a, 0x0b,
        0x0c,
    ];

    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        let frame = ac.rx.recv().await.unwrap(); // PADI
        let eth = Frame::parse(&frame).unwrap();
        let client = eth.src_mac();
        let offer = pado(b"isp1")
            .tag(tags::AC_COOKIE, &cookie)
            .tag(tags::RELAY_SESSION_ID, b"relay-7");
        ac.tx
            .send(discovery_frame(client, AC1, offer.build()))
            .unwrap();

        let frame = ac.rx.recv().await.unwrap(); // PADR
        let eth = Frame::parse(&frame).unwrap();
        let pppoe = PppoeFrame::parse(eth.payload()).unwrap();
        assert_eq!(pppoe.find_tag(tags::AC_COOKIE), Some(&cookie[..]));
        assert_eq!(pppoe.find_tag(tags::RELAY_SESSION_ID), Some(&b"relay-7"[..]));
        ac.tx
            .send(discovery_frame(client, AC1, pads(0x0099).build()))
            .unwrap();
    });

    let mut disc = Discovery::new(transport, CLIENT, DiscoveryConfig::default());
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);
    script.await.unwrap();
}

#[tokio::test]
async fn host_uniq_filters_unrelated_offers() {
    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        let frame = ac.rx.recv().await.unwrap(); // PADI
        let eth = Frame::parse(&frame).unwrap();
        let client = eth.src_mac();
        // First offer lacks the Host-Uniq tag, second echoes it
        ac.tx
            .send(discovery_frame(client, AC2, pado(b"other").build()))
            .unwrap();
        ac.tx
            .send(discovery_frame(
                client,
                AC1,
                pado(b"isp1").host_uniq(b"pid=42").build(),
            ))
            .unwrap();

        let frame = ac.rx.recv().await.unwrap(); // PADR
        let eth = Frame::parse(&frame).unwrap();
        assert_eq!(eth.dst_mac(), AC1, "the unfiltered offer wins");
        ac.tx
            .send(discovery_frame(
                client,
                AC1,
                pads(0x0007).host_uniq(b"pid=42").build(),
            ))
            .unwrap();
    });

    let mut disc = Discovery::new(
        transport,
        CLIENT,
        DiscoveryConfig {
            host_uniq: Some(b"pid=42".to_vec()),
            ..Default::default()
        },
    );
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);
    assert_eq!(disc.peer_mac(), AC1);
    script.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_padi_attempts_with_backoff() {
    let (transport, mut ac) = wire();
    let start = tokio::time::Instant::now();

    let mut disc = Discovery::new(
        transport,
        CLIENT,
        DiscoveryConfig {
            timeout: Duration::from_secs(5),
            ..Default::default()
        },
    );
    let outcome = disc.run().await.unwrap();

    assert_eq!(outcome, DiscoveryOutcome::GaveUp);
    assert_ne!(disc.state(), DiscoveryState::Session);
    // Waits of T, 2T and 4T
    assert_eq!(start.elapsed(), Duration::from_secs(5 + 10 + 20));

    let mut padis = 0;
    while let Ok(frame) = ac.rx.try_recv() {
        let eth = Frame::parse(&frame).unwrap();
        assert!(eth.dst_mac().is_broadcast());
        let pppoe = PppoeFrame::parse(eth.payload()).unwrap();
        assert_eq!(pppoe.code(), codes::PADI);
        padis += 1;
    }
    assert_eq!(padis, 3);
}

#[tokio::test(start_paused = true)]
async fn padr_timeout_without_persist_gives_up() {
    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        let mut padis = 0;
        let mut padrs = 0;
        while let Some(frame) = ac.rx.recv().await {
            let eth = Frame::parse(&frame).unwrap();
            let pppoe = PppoeFrame::parse(eth.payload()).unwrap();
            match pppoe.code() {
                codes::PADI => {
                    padis += 1;
                    let _ = ac
                        .tx
                        .send(discovery_frame(eth.src_mac(), AC1, pado(b"isp1").build()));
                }
                codes::PADR => padrs += 1, // never confirm
                _ => {}
            }
        }
        (padis, padrs)
    });

    let mut disc = Discovery::new(transport, CLIENT, DiscoveryConfig::default());
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::GaveUp);

    drop(disc); // hang up so the script task sees end-of-wire
    let (padis, padrs) = script.await.unwrap();
    assert_eq!(padis, 1);
    assert_eq!(padrs, 3);
}

#[tokio::test(start_paused = true)]
async fn persist_restarts_from_padi_after_padr_timeout() {
    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        let mut padis = 0;
        let mut padrs = 0;
        while let Some(frame) = ac.rx.recv().await {
            let eth = Frame::parse(&frame).unwrap();
            let pppoe = PppoeFrame::parse(eth.payload()).unwrap();
            match pppoe.code() {
                codes::PADI => {
                    padis += 1;
                    let _ = ac
                        .tx
                        .send(discovery_frame(eth.src_mac(), AC1, pado(b"isp1").build()));
                }
                codes::PADR => {
                    padrs += 1;
                    // Ignore the first cycle's PADRs; only confirm
                    // after discovery restarted from PADI
                    if padis >= 2 {
                        let _ = ac
                            .tx
                            .send(discovery_frame(eth.src_mac(), AC1, pads(0x0055).build()));
                    }
                }
                _ => {}
            }
        }
        (padis, padrs)
    });

    let mut disc = Discovery::new(
        transport,
        CLIENT,
        DiscoveryConfig {
            persist: true,
            ..Default::default()
        },
    );
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);
    assert_eq!(disc.session_id(), 0x0055);

    drop(disc);
    let (padis, padrs) = script.await.unwrap();
    assert_eq!(padis, 2);
    assert_eq!(padrs, 4);
}

#[tokio::test(start_paused = true)]
async fn persist_resets_padi_counter_and_timeout() {
    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        let mut padis = 0;
        while let Some(frame) = ac.rx.recv().await {
            let eth = Frame::parse(&frame).unwrap();
            let pppoe = PppoeFrame::parse(eth.payload()).unwrap();
            match pppoe.code() {
                codes::PADI => {
                    padis += 1;
                    // Stay silent for the whole first retry cycle
                    if padis >= 4 {
                        let _ = ac
                            .tx
                            .send(discovery_frame(eth.src_mac(), AC1, pado(b"isp1").build()));
                    }
                }
                codes::PADR => {
                    let _ = ac
                        .tx
                        .send(discovery_frame(eth.src_mac(), AC1, pads(0x0077).build()));
                }
                _ => {}
            }
        }
        padis
    });

    let start = tokio::time::Instant::now();
    let mut disc = Discovery::new(
        transport,
        CLIENT,
        DiscoveryConfig {
            persist: true,
            ..Default::default()
        },
    );
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);
    // Three timed-out waits (5+10+20s), then the reset cycle's first
    // PADI is answered immediately
    assert_eq!(start.elapsed(), Duration::from_secs(35));

    drop(disc);
    assert_eq!(script.await.unwrap(), 4);
}

#[tokio::test]
async fn bogus_length_frame_is_dropped() {
    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        let frame = ac.rx.recv().await.unwrap(); // PADI
        let eth = Frame::parse(&frame).unwrap();
        let client = eth.src_mac();

        // Claims 2000 payload bytes but delivers ~100
        let mut bogus = Vec::new();
        bogus.extend_from_slice(&client.0);
        bogus.extend_from_slice(&AC1.0);
        bogus.extend_from_slice(&PPPOE_DISCOVERY_ETHERTYPE.to_be_bytes());
        bogus.extend_from_slice(&[0x11, codes::PADO, 0x00, 0x00]);
        bogus.extend_from_slice(&2000u16.to_be_bytes());
        bogus.resize(100, 0);
        ac.tx.send(bogus).unwrap();

        // A well-formed offer afterwards still goes through
        ac.tx
            .send(discovery_frame(client, AC1, pado(b"isp1").build()))
            .unwrap();

        let frame = ac.rx.recv().await.unwrap(); // PADR
        let eth = Frame::parse(&frame).unwrap();
        ac.tx
            .send(discovery_frame(client, AC1, pads(0x0011).build()))
            .unwrap();
        assert_eq!(eth.dst_mac(), AC1);
    });

    let mut disc = Discovery::new(transport, CLIENT, DiscoveryConfig::default());
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);
    script.await.unwrap();
}

#[tokio::test]
async fn zero_session_id_is_tolerated() {
    let (transport, ac) = wire();
    tokio::spawn(simple_ac(ac, AC1, 0));

    let mut disc = Discovery::new(transport, CLIENT, DiscoveryConfig::default());
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);
    assert_eq!(disc.state(), DiscoveryState::Session);
    assert_eq!(disc.session_id(), 0);
}

#[tokio::test]
async fn error_tag_in_pado_is_fatal_without_persist() {
    let (transport, mut ac) = wire();
    tokio::spawn(async move {
        let frame = ac.rx.recv().await.unwrap(); // PADI
        let eth = Frame::parse(&frame).unwrap();
        let offer = pado(b"isp1").tag(tags::AC_SYSTEM_ERROR, b"out of sessions");
        let _ = ac
            .tx
            .send(discovery_frame(eth.src_mac(), AC1, offer.build()));
    });

    let mut disc = Discovery::new(transport, CLIENT, DiscoveryConfig::default());
    match disc.run().await {
        Err(Error::AcError { packet, tag, .. }) => {
            assert_eq!(packet, "PADO");
            assert_eq!(tag, "AC-System-Error");
        }
        other => panic!("expected AcError, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn error_tag_in_pado_is_skipped_with_persist() {
    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        let frame = ac.rx.recv().await.unwrap(); // PADI
        let eth = Frame::parse(&frame).unwrap();
        let client = eth.src_mac();
        let broken = pado(b"isp1").tag(tags::GENERIC_ERROR, b"nope");
        ac.tx
            .send(discovery_frame(client, AC2, broken.build()))
            .unwrap();
        ac.tx
            .send(discovery_frame(client, AC1, pado(b"isp1").build()))
            .unwrap();

        let frame = ac.rx.recv().await.unwrap(); // PADR
        let eth = Frame::parse(&frame).unwrap();
        assert_eq!(eth.dst_mac(), AC1);
        ac.tx
            .send(discovery_frame(client, AC1, pads(0x0021).build()))
            .unwrap();
    });

    let mut disc = Discovery::new(
        transport,
        CLIENT,
        DiscoveryConfig {
            persist: true,
            ..Default::default()
        },
    );
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);
    assert_eq!(disc.peer_mac(), AC1);
    script.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn probe_collects_offers_without_padr() {
    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        let mut non_padi = 0;
        while let Some(frame) = ac.rx.recv().await {
            let eth = Frame::parse(&frame).unwrap();
            let pppoe = PppoeFrame::parse(eth.payload()).unwrap();
            if pppoe.code() != codes::PADI {
                non_padi += 1;
                continue;
            }
            let client = eth.src_mac();
            let offer = pado(b"isp1").tag(tags::AC_COOKIE, &[1, 2, 3]);
            let _ = ac.tx.send(discovery_frame(client, AC1, offer.build()));
            let _ = ac
                .tx
                .send(discovery_frame(client, AC2, pado(b"isp2").build()));
        }
        non_padi
    });

    let mut disc = Discovery::new(transport, CLIENT, DiscoveryConfig::default());
    let offers = disc.probe().await.unwrap();

    assert_eq!(offers.len(), 2);
    assert_eq!(offers[0].ac_name, "isp1");
    assert_eq!(offers[0].mac, AC1);
    assert_eq!(offers[0].cookie.as_deref(), Some(&[1, 2, 3][..]));
    assert_eq!(offers[1].ac_name, "isp2");
    assert_eq!(offers[1].mac, AC2);
    assert_eq!(disc.num_pados(), 2);

    drop(disc);
    assert_eq!(script.await.unwrap(), 0, "probe must never send a PADR");
}

#[tokio::test]
async fn max_payload_reply_clamps_mru() {
    let (transport, mut ac) = wire();
    let script = tokio::spawn(async move {
        while let Some(frame) = ac.rx.recv().await {
            let eth = Frame::parse(&frame).unwrap();
            let pppoe = PppoeFrame::parse(eth.payload()).unwrap();
            let client = eth.src_mac();
            match pppoe.code() {
                codes::PADI => {
                    // The PADI must carry our advertisement
                    assert_eq!(
                        pppoe.find_tag(tags::PPP_MAX_PAYLOAD),
                        Some(&1508u16.to_be_bytes()[..])
                    );
                    let offer = pado(b"isp1").ppp_max_payload(1496);
                    let _ = ac.tx.send(discovery_frame(client, AC1, offer.build()));
                }
                codes::PADR => {
                    let _ = ac.tx.send(discovery_frame(client, AC1, pads(0x0031).build()));
                }
                _ => {}
            }
        }
    });

    let mut disc = Discovery::new(transport, CLIENT, DiscoveryConfig::default())
        .with_mru_negotiator(Box::new(LcpMru {
            want: 1508,
            allow: 1508,
        }));
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);

    let mru = disc.mru_negotiator().unwrap();
    assert_eq!(mru.want(), 1496);
    assert_eq!(mru.allow(), 1496);

    drop(disc); // close the wire so the script task's assertions surface
    script.await.unwrap();
}

#[tokio::test]
async fn missing_max_payload_reply_clamps_to_standard_mtu() {
    let (transport, ac) = wire();
    tokio::spawn(simple_ac(ac, AC1, 0x0032));

    let mut disc = Discovery::new(transport, CLIENT, DiscoveryConfig::default())
        .with_mru_negotiator(Box::new(LcpMru {
            want: 1508,
            allow: 1508,
        }));
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::Established);

    // RFC 4638: no PPP-Max-Payload in the reply limits MTU/MRU to 1492
    let mru = disc.mru_negotiator().unwrap();
    assert_eq!(mru.want(), 1492);
    assert_eq!(mru.allow(), 1492);
}

#[tokio::test]
async fn kill_session_sends_padt() {
    let (transport, mut ac) = wire();

    let mut disc = Discovery::new(
        transport,
        CLIENT,
        DiscoveryConfig {
            skip_discovery: true,
            kill_session: true,
            session: Some(0x1234),
            ac_mac: Some(AC1),
            ..Default::default()
        },
    );
    assert_eq!(disc.run().await.unwrap(), DiscoveryOutcome::SessionKilled);

    let frame = ac.rx.try_recv().unwrap();
    let eth = Frame::parse(&frame).unwrap();
    assert_eq!(eth.dst_mac(), AC1);
    let pppoe = PppoeFrame::parse(eth.payload()).unwrap();
    assert_eq!(pppoe.code(), codes::PADT);
    assert_eq!(pppoe.session_id(), 0x1234);
}
