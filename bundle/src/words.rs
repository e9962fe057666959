//! Word tagging pipeline. Every line is split into words, each word is tagged asynchronously as
//! a short word, a long word, and/or a word starting with `s`, and a processing-time watermark
//! follows every line.

use std::error::Error;
use std::fmt;

use bundle_core::{
    BundleOperator, ChannelEmitter, InputEvent, Output, OutputEmitter, Processor, Settings,
    Watermark,
};
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Words up to this length are short.
const WORD_LENGTH_CUTOFF: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tag {
    BelowCutoff,
    AboveCutoff,
    StartsWithS,
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::BelowCutoff => write!(f, "below_cutoff"),
            Tag::AboveCutoff => write!(f, "above_cutoff"),
            Tag::StartsWithS => write!(f, "starts_with_s"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct TaggedWord {
    pub(crate) tag: Tag,
    pub(crate) word: String,
}

/// Strips everything but ASCII letters and tags what is left. A word can get more than one tag,
/// or none if nothing is left.
fn tag_word(raw: &str) -> Vec<TaggedWord> {
    let word: String = raw.chars().filter(char::is_ascii_alphabetic).collect();
    if word.is_empty() {
        return Vec::new();
    }

    let mut tagged = Vec::with_capacity(2);
    let tag = if word.len() <= WORD_LENGTH_CUTOFF {
        Tag::BelowCutoff
    } else {
        Tag::AboveCutoff
    };
    tagged.push(TaggedWord {
        tag,
        word: word.clone(),
    });
    if word.starts_with('s') {
        tagged.push(TaggedWord {
            tag: Tag::StartsWithS,
            word,
        });
    }
    tagged
}

struct WordTagger;

impl Processor<String, TaggedWord> for WordTagger {
    fn process(
        &self,
        element: String,
    ) -> BoxFuture<'static, bundle_core::Result<Vec<TaggedWord>>> {
        async move {
            // tagging completes on a later poll, like a remote call would
            tokio::task::yield_now().await;
            Ok(tag_word(&element))
        }
        .boxed()
    }

    fn finish_bundle(&self, _emitter: &dyn OutputEmitter<TaggedWord>) -> bundle_core::Result<()> {
        debug!("Finished a bundle of words");
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PipelineStats {
    pub(crate) words: usize,
    pub(crate) outputs: usize,
    pub(crate) watermarks: usize,
}

/// Runs the pipeline until `reader` is exhausted or `cln_token` is cancelled. A failed output
/// cancels the token and fails the run.
pub(crate) async fn run<R>(
    settings: &Settings,
    reader: R,
    cln_token: CancellationToken,
) -> Result<PipelineStats, Box<dyn Error>>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    let operator = BundleOperator::new(&settings.bundle, WordTagger);
    let (emitter, mut ordered) = ChannelEmitter::new();
    let (input_tx, input_rx) = mpsc::channel(settings.input_channel_size);

    let operator_handle = operator.streaming_process(
        ReceiverStream::new(input_rx),
        emitter,
        cln_token.clone(),
    );
    let reader_handle = tokio::spawn(read_words(reader, input_tx, cln_token.clone()));

    let mut stats = PipelineStats::default();
    let mut failure = None;
    while let Some(output) = ordered.next().await {
        match output {
            Ok(Output::Element(tagged)) => {
                stats.outputs += 1;
                info!(tag = %tagged.tag, word = %tagged.word, "Tagged word");
            }
            Ok(Output::Watermark(watermark)) => {
                stats.watermarks += 1;
                info!(%watermark, "Watermark");
            }
            Err(e) => {
                error!(?e, "Output failed, stopping the pipeline");
                cln_token.cancel();
                failure = Some(e);
                break;
            }
        }
    }

    stats.words = reader_handle.await??;
    operator_handle.await??;
    match failure {
        Some(e) => Err(e.into()),
        None => Ok(stats),
    }
}

/// Sends every word of every line followed by a watermark. Returns the number of words sent.
async fn read_words<R>(
    reader: R,
    input_tx: mpsc::Sender<InputEvent<String>>,
    cln_token: CancellationToken,
) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut words = 0;
    loop {
        let line = tokio::select! {
            _ = cln_token.cancelled() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };

        for word in line.split_whitespace() {
            if input_tx
                .send(InputEvent::Element(word.to_string()))
                .await
                .is_err()
            {
                return Ok(words);
            }
            words += 1;
        }
        if input_tx
            .send(InputEvent::Watermark(Watermark::now()))
            .await
            .is_err()
        {
            break;
        }
    }
    Ok(words)
}
