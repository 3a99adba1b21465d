// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use futures::stream::unfold;
use futures::{Stream, StreamExt};
use pin_project::pin_project;
use std::future::Future;
use std::pin::Pin;

/// Describes a paged response that carries the token for the next page.
///
/// An empty token marks the last page.
pub trait PageableResponse {
    fn next_page_token(&self) -> String;
}

/// Adapts a page-at-a-time list operation into a [futures::Stream] of pages.
///
/// The paginator is lazy: no request is issued until the stream is first
/// polled, and each page is fetched only when the consumer asks for it. The
/// stream ends after the page with an empty token, or after the first error.
#[pin_project]
pub struct Paginator<T, E> {
    #[pin]
    stream: Pin<Box<dyn Stream<Item = Result<T, E>> + Send>>,
}

type ControlFlow = std::ops::ControlFlow<(), String>;

impl<T, E> Paginator<T, E>
where
    T: PageableResponse,
{
    /// Creates a new [Paginator] given the initial page token and a function
    /// to fetch the next page.
    pub fn new<F>(
        seed_token: String,
        execute: impl Fn(String) -> F + Clone + Send + 'static,
    ) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        let stream = unfold(ControlFlow::Continue(seed_token), move |state| {
            let execute = execute.clone();
            async move {
                let token = match state {
                    ControlFlow::Continue(token) => token,
                    ControlFlow::Break(_) => return None,
                };
                match execute(token).await {
                    Ok(page) => {
                        let tok = page.next_page_token();
                        let next_state = if tok.is_empty() {
                            ControlFlow::Break(())
                        } else {
                            ControlFlow::Continue(tok)
                        };
                        Some((Ok(page), next_state))
                    }
                    Err(e) => Some((Err(e), ControlFlow::Break(()))),
                }
            }
        });
        Self {
            stream: Box::pin(stream),
        }
    }

    /// Returns the next page of the wrapped stream.
    pub fn next(&mut self) -> futures::stream::Next<'_, Self> {
        StreamExt::next(self)
    }
}

impl<T, E> Stream for Paginator<T, E> {
    type Item = Result<T, E>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.project().stream.poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestPage {
        items: Vec<String>,
        next_page_token: String,
    }

    impl PageableResponse for TestPage {
        fn next_page_token(&self) -> String {
            self.next_page_token.clone()
        }
    }

    fn pages() -> Vec<TestPage> {
        vec![
            TestPage {
                items: vec!["a".into(), "b".into()],
                next_page_token: "token-1".into(),
            },
            TestPage {
                items: vec!["c".into()],
                next_page_token: String::new(),
            },
        ]
    }

    #[tokio::test]
    async fn all_pages() {
        let data = Arc::new(std::sync::Mutex::new(pages()));
        let execute = move |_token: String| {
            let data = data.clone();
            async move {
                let mut data = data.lock().unwrap();
                Ok::<_, String>(data.remove(0))
            }
        };

        let mut got = Vec::new();
        let mut paginator = Paginator::new(String::new(), execute);
        while let Some(page) = paginator.next().await {
            got.extend(page.unwrap().items);
        }
        assert_eq!(got, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn tokens_thread_through() {
        let data = Arc::new(std::sync::Mutex::new(pages()));
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let execute = {
            let seen = seen.clone();
            move |token: String| {
                let data = data.clone();
                seen.lock().unwrap().push(token);
                async move { Ok::<_, String>(data.lock().unwrap().remove(0)) }
            }
        };

        let mut paginator = Paginator::new("seed".into(), execute);
        while paginator.next().await.is_some() {}
        assert_eq!(*seen.lock().unwrap(), ["seed", "token-1"]);
    }

    #[tokio::test]
    async fn fetches_lazily() {
        let calls = Arc::new(AtomicUsize::new(0));
        let execute = {
            let calls = calls.clone();
            move |_token: String| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Ok::<_, String>(TestPage {
                        items: vec![],
                        next_page_token: "more".into(),
                    })
                }
            }
        };

        let mut paginator = Paginator::new(String::new(), execute);
        // Construction alone must not fetch.
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        let _ = paginator.next().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let _ = paginator.next().await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stops_after_error() {
        let execute = |_token: String| async { Err::<TestPage, _>("boom".to_string()) };
        let mut paginator = Paginator::new(String::new(), execute);
        let mut errors = 0;
        while let Some(page) = paginator.next().await {
            match page {
                Ok(_) => panic!("should not succeed"),
                Err(e) => {
                    assert_eq!(e, "boom");
                    errors += 1;
                }
            }
        }
        assert_eq!(errors, 1);
    }
}
