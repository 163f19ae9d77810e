//! Run a schema's message machines over the UDP and TCP payloads of a pcap/pcapng capture.
//!
//! Usage:
//!   decode_pcap [--verbose] [--dump[=PATH]] [--message=NAME] CAPTURE SCHEMA
//!
//! Without `--message`, each payload is matched against every message type in schema order
//! (first match wins). With `--message=NAME`, each payload is decoded as a frame of
//! consecutive NAME messages.

use protofmt::dump::{hex_string, message_to_dump, printable_prefix};
use protofmt::frame::decode_frame;
use protofmt::{parse_file, Codec, ResolvedProtocol, Severity};
use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;

struct Options {
    verbose: bool,
    message: Option<String>,
}

#[derive(Default)]
struct Stats {
    packets: u64,
    payloads: u64,
    decoded: u64,
    removed: u64,
    unmatched: u64,
    /// message type -> (decoded, removed)
    per_message: BTreeMap<String, (u64, u64)>,
    first_errors: BTreeMap<String, String>,
}

fn main() -> anyhow::Result<()> {
    let mut raw_args: Vec<String> = std::env::args().skip(1).collect();
    let verbose = if let Some(pos) = raw_args.iter().position(|a| a == "--verbose" || a == "-v") {
        raw_args.remove(pos);
        true
    } else {
        false
    };
    let dump_path: Option<PathBuf> = raw_args
        .iter()
        .position(|a| a.starts_with("--dump"))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            if arg == "--dump" {
                Some(PathBuf::from("-"))
            } else {
                arg.strip_prefix("--dump=").map(PathBuf::from)
            }
        });
    let message: Option<String> = raw_args
        .iter()
        .position(|a| a.starts_with("--message="))
        .and_then(|pos| {
            let arg = raw_args.remove(pos);
            arg.strip_prefix("--message=").map(str::to_string)
        });
    let mut args = raw_args.into_iter();
    let (Some(pcap_path), Some(schema_path)) = (args.next().map(PathBuf::from), args.next().map(PathBuf::from))
    else {
        anyhow::bail!("usage: decode_pcap [--verbose] [--dump[=PATH]] [--message=NAME] CAPTURE SCHEMA");
    };

    let protocol = parse_file(&schema_path).map_err(|e| anyhow::anyhow!(e))?;
    let resolved = ResolvedProtocol::resolve(protocol).map_err(|e| anyhow::anyhow!(e))?;
    let codec = Codec::new(resolved)?;
    if let Some(name) = &message {
        if codec.machine(name).is_none() {
            anyhow::bail!("{}: no message named {}", schema_path.display(), name);
        }
    }
    if verbose {
        for (name, d) in codec.diagnostics() {
            if d.severity == Severity::Warning {
                eprintln!("note: {}: {} [{}]", name, d.message, d.rule.id());
            }
        }
    }

    let mut dump_writer: Option<Box<dyn Write>> = match dump_path.as_ref() {
        Some(p) if p.as_os_str() == "-" => Some(Box::new(std::io::stdout()) as Box<dyn Write>),
        Some(p) => Some(Box::new(File::create(p)?) as Box<dyn Write>),
        None => None,
    };

    let opts = Options { verbose, message };
    let mut stats = Stats::default();

    // pcapng starts with a section header block; anything else is read as legacy pcap.
    let mut probe = [0u8; 4];
    {
        let mut f = File::open(&pcap_path)?;
        f.read_exact(&mut probe)?;
    }
    let file = File::open(&pcap_path)?;
    if probe == [0x0a, 0x0d, 0x0d, 0x0a] {
        run_pcapng(file, &codec, &opts, &mut dump_writer, &mut stats)?;
    } else {
        run_legacy_pcap(file, &codec, &opts, &mut dump_writer, &mut stats)?;
    }

    eprintln!("pcap:   {}", pcap_path.display());
    eprintln!("schema: {}", schema_path.display());
    eprintln!("packets: {}", stats.packets);
    eprintln!("udp/tcp payloads: {}", stats.payloads);
    eprintln!("decoded messages: {}", stats.decoded);
    eprintln!("removed (validation/decoding errors): {}", stats.removed);
    eprintln!("unmatched payloads: {}", stats.unmatched);
    if !stats.per_message.is_empty() {
        eprintln!("per message summary:");
        for (name, (decoded, removed)) in &stats.per_message {
            eprintln!("  {}: decoded={}, removed={}", name, decoded, removed);
            if let Some(err) = stats.first_errors.get(name) {
                eprintln!("    first error: {}", err);
            }
        }
    }
    Ok(())
}

fn run_legacy_pcap<R: Read>(
    file: R,
    codec: &Codec,
    opts: &Options,
    dump: &mut Option<Box<dyn Write>>,
    stats: &mut Stats,
) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcap::LegacyPcapReader::new(1 << 20, file)?;
    let mut linktype: Option<Linktype> = None;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(h) => linktype = Some(h.network),
                    PcapBlockOwned::Legacy(b) => {
                        stats.packets += 1;
                        let lt = linktype.unwrap_or(Linktype(1));
                        if let Some(payload) = payload_from_linktype(lt, b.data) {
                            process_payload(codec, opts, payload, stats.packets, dump, stats)?;
                        }
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcap refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcap read error: {:?}", e)),
        }
    }
    Ok(())
}

fn run_pcapng<R: Read>(
    file: R,
    codec: &Codec,
    opts: &Options,
    dump: &mut Option<Box<dyn Write>>,
    stats: &mut Stats,
) -> anyhow::Result<()> {
    let mut reader = pcap_parser::pcapng::PcapNGReader::new(1 << 20, file)?;
    let mut if_linktypes: Vec<Linktype> = Vec::new();
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(b) = block {
                    let packet = match &b {
                        PcapNgBlock::InterfaceDescription(idb) => {
                            if_linktypes.push(idb.linktype);
                            None
                        }
                        PcapNgBlock::EnhancedPacket(epb) => Some((
                            if_linktypes.get(epb.if_id as usize).copied(),
                            epb.packet_data(),
                        )),
                        PcapNgBlock::SimplePacket(spb) => {
                            Some((if_linktypes.first().copied(), spb.packet_data()))
                        }
                        _ => None,
                    };
                    if let Some((lt, frame)) = packet {
                        stats.packets += 1;
                        if let Some(payload) = payload_from_linktype(lt.unwrap_or(Linktype(1)), frame) {
                            process_payload(codec, opts, payload, stats.packets, dump, stats)?;
                        }
                    }
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader
                    .refill()
                    .map_err(|e| anyhow::anyhow!("pcapng refill error: {:?}", e))?;
            }
            Err(e) => return Err(anyhow::anyhow!("pcapng read error: {:?}", e)),
        }
    }
    Ok(())
}

fn process_payload(
    codec: &Codec,
    opts: &Options,
    payload: &[u8],
    packet_index: u64,
    dump: &mut Option<Box<dyn Write>>,
    stats: &mut Stats,
) -> std::io::Result<()> {
    if payload.is_empty() {
        return Ok(());
    }
    stats.payloads += 1;
    if let Some(w) = dump.as_mut() {
        writeln!(w, "=== packet {}  len {} ===", packet_index, payload.len())?;
        writeln!(w, "  data: {}", hex_string(&payload[..payload.len().min(32)]))?;
    }

    let Some(name) = &opts.message else {
        match codec.decode_any(payload) {
            Ok(d) => {
                stats.decoded += 1;
                stats.per_message.entry(d.name.clone()).or_default().0 += 1;
                if let (Some(w), Some(machine)) = (dump.as_mut(), codec.machine(&d.name)) {
                    writeln!(w, "  bytes [0-{}]  DECODED", d.consumed)?;
                    writeln!(w, "{}", message_to_dump(machine, &d.fields, 2))?;
                }
            }
            Err(e) => {
                stats.unmatched += 1;
                if opts.verbose {
                    eprintln!(
                        "note: packet {}: {} (starts {:?})",
                        packet_index,
                        e,
                        printable_prefix(payload, 24)
                    );
                }
                if let Some(w) = dump.as_mut() {
                    writeln!(w, "  {}", e)?;
                }
            }
        }
        return Ok(());
    };

    let entry = stats.per_message.entry(name.clone()).or_default();
    match decode_frame(codec, name, payload) {
        Ok(res) => {
            entry.0 += res.messages.len() as u64;
            entry.1 += res.removed.len() as u64;
            stats.decoded += res.messages.len() as u64;
            stats.removed += res.removed.len() as u64;
            if let Some(rm) = res.removed.first() {
                stats
                    .first_errors
                    .entry(name.clone())
                    .or_insert_with(|| rm.reason.clone());
            }
            if let Some(w) = dump.as_mut() {
                for msg in &res.messages {
                    let (a, b) = msg.byte_range;
                    writeln!(w, "  bytes [{}-{}]  DECODED", a, b)?;
                    if let Some(machine) = codec.machine(&msg.name) {
                        writeln!(w, "{}", message_to_dump(machine, &msg.values, 2))?;
                    }
                }
                for rm in &res.removed {
                    let (a, b) = rm.byte_range;
                    writeln!(w, "  bytes [{}-{}]  REMOVED: {}", a, b, rm.reason)?;
                }
            }
        }
        Err(e) => {
            entry.1 += 1;
            stats.removed += 1;
            stats
                .first_errors
                .entry(name.clone())
                .or_insert_with(|| e.to_string());
            if let Some(w) = dump.as_mut() {
                writeln!(w, "  frame decode error: {}", e)?;
            }
        }
    }
    Ok(())
}

/// Extract the UDP or TCP payload of an IPv4 frame, bounded by the IP total length so
/// Ethernet padding of short frames is not included.
fn payload_from_linktype(linktype: Linktype, frame: &[u8]) -> Option<&[u8]> {
    let l3 = match linktype.0 {
        1 => ethernet_l3(frame)?,      // DLT_EN10MB
        101 => frame,                  // DLT_RAW
        113 => linux_sll_l3(frame)?,   // DLT_LINUX_SLL
        _ => return None,
    };
    ipv4_payload(l3)
}

fn ethernet_l3(frame: &[u8]) -> Option<&[u8]> {
    if frame.len() < 14 {
        return None;
    }
    let mut off = 12usize;
    let mut ethertype = u16::from_be_bytes([frame[off], frame[off + 1]]);
    off += 2;
    // 802.1Q / 802.1ad tags
    while ethertype == 0x8100 || ethertype == 0x88a8 {
        if frame.len() < off + 4 {
            return None;
        }
        ethertype = u16::from_be_bytes([frame[off + 2], frame[off + 3]]);
        off += 4;
    }
    match ethertype {
        0x0800 => Some(&frame[off..]),
        _ => None,
    }
}

fn linux_sll_l3(frame: &[u8]) -> Option<&[u8]> {
    // SLL v1: 16-byte header, protocol at bytes 14..16
    if frame.len() < 16 {
        return None;
    }
    let proto = u16::from_be_bytes([frame[14], frame[15]]);
    match proto {
        0x0800 => Some(&frame[16..]),
        _ => None,
    }
}

fn ipv4_payload(l3: &[u8]) -> Option<&[u8]> {
    if l3.len() < 20 || l3[0] >> 4 != 4 {
        return None;
    }
    let ihl = (l3[0] & 0x0f) as usize * 4;
    let total_len = u16::from_be_bytes([l3[2], l3[3]]) as usize;
    if ihl < 20 || l3.len() < ihl || total_len < ihl {
        return None;
    }
    let l3 = if total_len <= l3.len() { &l3[..total_len] } else { l3 };
    let l4 = &l3[ihl..];
    match l3[9] {
        17 => {
            if l4.len() < 8 {
                return None;
            }
            let udp_len = u16::from_be_bytes([l4[4], l4[5]]) as usize;
            if udp_len < 8 || l4.len() < udp_len {
                return None;
            }
            Some(&l4[8..udp_len])
        }
        6 => {
            if l4.len() < 20 {
                return None;
            }
            let data_off = (l4[12] >> 4) as usize * 4;
            if data_off < 20 || l4.len() < data_off {
                return None;
            }
            Some(&l4[data_off..])
        }
        _ => None,
    }
}
