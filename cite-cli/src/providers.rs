//! Backend selection.

use std::sync::Arc;

use anyhow::Result;
use cite_rag::{EmbeddingProvider, ExtractiveGenerator, GenerationProvider, HashingEmbedder};

use crate::{Provider, ProviderArgs};

pub struct Backends {
    pub embedding: Arc<dyn EmbeddingProvider>,
    pub generation: Arc<dyn GenerationProvider>,
}

impl ProviderArgs {
    pub fn backends(&self) -> Result<Backends> {
        match self.provider {
            Provider::Offline => Ok(Backends {
                embedding: Arc::new(HashingEmbedder::new(self.dimension)),
                generation: Arc::new(ExtractiveGenerator::new()),
            }),
            Provider::Openai => self.openai(),
        }
    }

    #[cfg(feature = "openai")]
    fn openai(&self) -> Result<Backends> {
        use cite_rag::openai::{OpenAIEmbeddingProvider, OpenAIGenerationProvider};

        let mut embedding = OpenAIEmbeddingProvider::from_env()?;
        if let Some(model) = &self.embedding_model {
            embedding = embedding.with_model(model);
        }
        let mut generation = OpenAIGenerationProvider::from_env()?;
        if let Some(model) = &self.chat_model {
            generation = generation.with_model(model);
        }
        Ok(Backends { embedding: Arc::new(embedding), generation: Arc::new(generation) })
    }

    #[cfg(not(feature = "openai"))]
    fn openai(&self) -> Result<Backends> {
        anyhow::bail!("the openai provider requires building cite with `--features openai`")
    }

    /// A model judge over the chat backend, when one is available.
    pub fn judge(&self) -> Result<Arc<dyn GenerationProvider>> {
        match self.provider {
            Provider::Openai => Ok(self.openai()?.generation),
            Provider::Offline => {
                anyhow::bail!("--judge needs a language model; use --provider openai")
            }
        }
    }
}
