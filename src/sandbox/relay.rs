use crate::errors::RuntimeError;
use std::io::{self, Write};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    task,
    task::JoinHandle,
};

/// Line relay from a child's output to a blocking sink
///
/// One task reads lines and queues them, one blocking worker writes them out.
/// Nothing waits for either half unless [Relay::join()] is called.
#[derive(Debug)]
pub(crate) struct Relay {
    reader: JoinHandle<io::Result<()>>,
    writer: JoinHandle<io::Result<()>>,
}

pub(crate) fn spawn<R>(source: R, sink: Box<dyn Write + Send>) -> Relay
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (sender, receiver) = mpsc::unbounded_channel();
    Relay {
        reader: task::spawn(read_lines(source, sender)),
        writer: task::spawn_blocking(move || write_lines(receiver, sink)),
    }
}

async fn read_lines<R>(source: R, sender: UnboundedSender<Vec<u8>>) -> io::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut source = BufReader::new(source);
    loop {
        let mut line = Vec::new();
        if source.read_until(b'\n', &mut line).await? == 0 {
            log::trace!("output relay reached end of stream");
            return Ok(());
        }
        if line.last() != Some(&b'\n') {
            line.push(b'\n');
        }
        if sender.send(line).is_err() {
            // writer gave up, its error is reported by join()
            return Ok(());
        }
    }
}

fn write_lines(
    mut receiver: UnboundedReceiver<Vec<u8>>,
    mut sink: Box<dyn Write + Send>,
) -> io::Result<()> {
    while let Some(line) = receiver.blocking_recv() {
        sink.write_all(&line)?;
        sink.flush()?;
    }
    Ok(())
}

impl Relay {
    /// Wait until every line has been read and written
    pub async fn join(self) -> Result<(), RuntimeError> {
        let read = self.reader.await?;
        let written = self.writer.await?;
        read?;
        written?;
        Ok(())
    }
}
