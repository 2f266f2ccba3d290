/// The ICMP header checksum as defined in RFC 777: "The 16 bit one's complement of the one's
///  complement sum of all 16 bit words in the header. For computing the checksum, the checksum
///  field should be zero."
///
/// Words are read in network byte order. An odd trailing byte is treated as a word padded with
///  a zero byte. The resulting value is meant to be written back in network byte order, which
///  makes the calculation independent of host byte order.
pub fn compute_checksum(buf: &[u8]) -> u16 {
    let mut chunks = buf.chunks_exact(2);

    let mut sum = chunks.by_ref()
        .map(|word| u16::from_be_bytes([word[0], word[1]]) as u32)
        .fold(0u32, |acc, word| acc.wrapping_add(word));

    if let [last] = chunks.remainder() {
        sum = sum.wrapping_add((*last as u32) << 8);
    }

    sum = (sum >> 16) + (sum & 0xffff);
    sum += sum >> 16;

    !sum as u16
}

/// Checksum of an ICMP message with its checksum field (bytes 2 and 3) treated as zero,
///  i.e. the value a sender must have put into that field.
pub fn compute_checksum_with_zeroed_field(icmp_message: &[u8]) -> u16 {
    let mut scratch = icmp_message.to_vec();
    if let Some(field) = scratch.get_mut(2..4) {
        field.fill(0);
    }
    compute_checksum(&scratch)
}
