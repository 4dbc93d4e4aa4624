//! Interactive terminal session (`--cli`).

use nianqa_core::{Conversation, Orchestrator};
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

const BANNER: &str = "===========================================
中国新年习俗问答系统
===========================================
你可以问我关于中国新年习俗的问题，例如：
- 为啥要倒贴福？
- 守岁是干啥的？
- 压岁钱是怎么来的？
- 那福字什么时候贴？
输入 '退出' 或 'exit' 结束对话
===========================================";

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Blank,
    Question(&'a str),
}

fn classify(line: &str) -> Input<'_> {
    match line.trim() {
        "退出" | "exit" => Input::Quit,
        "" => Input::Blank,
        q => Input::Question(q),
    }
}

pub(crate) async fn run(orchestrator: Arc<Orchestrator>, max_history_length: usize) -> std::io::Result<()> {
    let mut conversation = Conversation::new(orchestrator, max_history_length);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{}", BANNER);

    loop {
        print!("\n你问：");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match classify(&line) {
            Input::Quit => {
                println!("再见！");
                break;
            }
            Input::Blank => println!("请输入问题。"),
            Input::Question(question) => {
                let response = conversation.process_query(question).await;
                println!("我答：{}", response.answer);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_classification() {
        assert_eq!(classify(" 退出 "), Input::Quit);
        assert_eq!(classify("exit"), Input::Quit);
        assert_eq!(classify("   "), Input::Blank);
        assert_eq!(classify(" 为啥要倒贴福？\n"), Input::Question("为啥要倒贴福？"));
    }
}
