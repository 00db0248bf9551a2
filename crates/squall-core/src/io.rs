use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

const BUFFER_SIZE: usize = 16 * 1024;

/// Copy one direction until EOF, then propagate the half-close to the peer.
async fn copy_half<A, B>(rd: &mut ReadHalf<A>, wr: &mut WriteHalf<B>) -> std::io::Result<u64>
where
	A: AsyncRead,
	B: AsyncWrite,
{
	let mut buf = [0u8; BUFFER_SIZE];
	let mut copied = 0u64;
	loop {
		let num = rd.read(&mut buf).await?;
		// EOF: shut down the peer's write side, leave its read side alone
		if num == 0 {
			wr.shutdown().await?;
			return Ok(copied);
		}
		copied += num as u64;
		wr.write_all(&buf[..num]).await?;
	}
}

/// Bidirectional splice between two streams.
///
/// Both directions run concurrently; neither can starve the other. A clean
/// EOF on one direction half-closes the peer and lets the other direction
/// drain; any error tears down both directions at once. Returns the bytes
/// copied a->b and b->a, plus the first error observed.
pub async fn copy_io<A, B>(a: A, b: B) -> (u64, u64, Option<std::io::Error>)
where
	A: AsyncRead + AsyncWrite + Send,
	B: AsyncRead + AsyncWrite + Send,
{
	let (mut ar, mut aw) = tokio::io::split(a);
	let (mut br, mut bw) = tokio::io::split(b);

	let a2b = copy_half(&mut ar, &mut bw);
	let b2a = copy_half(&mut br, &mut aw);
	tokio::pin!(a2b);
	tokio::pin!(b2a);

	let mut a2b_num = 0;
	let mut b2a_num = 0;
	let mut a2b_done = false;
	let mut b2a_done = false;
	let mut last_err = None;

	loop {
		tokio::select! {
			res = &mut a2b, if !a2b_done => {
				a2b_done = true;
				match res {
					Ok(num) => a2b_num = num,
					Err(err) => {
						last_err = Some(err);
						break;
					}
				}
			},
			res = &mut b2a, if !b2a_done => {
				b2a_done = true;
				match res {
					Ok(num) => b2a_num = num,
					Err(err) => {
						last_err = Some(err);
						break;
					}
				}
			},
			else => break,
		}
	}

	(a2b_num, b2a_num, last_err)
}
