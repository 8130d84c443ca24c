//! Sample exams for tests.
//!
//! Small hand-written documents covering each supported layout, plus a
//! generator for long synthetic exams whose questions can be glued onto the
//! previous line to exercise gap recovery.

use strum::{Display, EnumIter};

/// Built-in sample exams (document text and answer key).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum BuiltinExam {
    /// Two `N.` questions with `(A)` options.
    ArithmeticAndSky,
    /// `{N}` numbering, publisher boilerplate, a figure reference.
    BracesWithBoilerplate,
    /// `QUESTÃO N` headers with `A)` options at line start.
    KeywordHeaders,
    /// One question refers to an image and lists no options.
    ImageQuestion,
    /// `QN` numbering with `[A]` options run together on one line.
    QPrefixBracketed,
}

impl BuiltinExam {
    pub fn text(&self) -> &'static str {
        match self {
            BuiltinExam::ArithmeticAndSky => {
                "1. What is 2+2?\n(A) 3\n(B) 4\n(C) 5\n2. What color is the sky?\n(A) Red\n(B) Blue\n(C) Green\n"
            }
            BuiltinExam::BracesWithBoilerplate => concat!(
                "Processo Seletivo Unificado 2024 - PROVA R1\n",
                "{1} Paciente de 45 anos chega ao pronto-socorro com dor torácica.\n",
                "Qual o próximo passo?\n",
                "(A) Alta hospitalar\n(B) Eletrocardiograma imediato\n(C) Observação\n(D) Tomografia de crânio\n",
                "pcimarkpci MjAwLjE5Mi4xNjguMQ==\n",
                "Página 1 de 2\n",
                "{2} Observe a figura abaixo e assinale a alternativa correta sobre o achado.\n",
                "(A) Pneumotórax\n(B) Derrame pleural\n(C) Consolidação\n(D) Atelectasia\n",
                "www.pciconcursos.com.br\n",
                "{3} Qual antibiótico é indicado para pneumonia comunitária leve?\n",
                "(A) Amoxicilina\n(B) Vancomicina\n(C) Meropenem\n(D) Linezolida\n(E) Colistina\n",
                "Página 2 de 2\n",
            ),
            BuiltinExam::KeywordHeaders => concat!(
                "QUESTÃO 01\n",
                "Which vitamin deficiency causes scurvy in adults?\n",
                "A) Vitamin A\nB) Vitamin B12\nC) Vitamin C\nD) Vitamin D\n",
                "QUESTÃO 02\n",
                "Which organ produces insulin in the human body?\n",
                "A) Liver\nB) Pancreas\nC) Spleen\nD) Kidney\n",
            ),
            BuiltinExam::ImageQuestion => concat!(
                "1. Which structure is the largest artery of the body?\n",
                "(A) Aorta\n(B) Carotid\n(C) Femoral\n",
                "2. Identify the lesion shown in the radiograph provided with this question.\n",
                "3. Which cells carry oxygen in the bloodstream?\n",
                "(A) Erythrocytes\n(B) Neutrophils\n(C) Platelets\n",
            ),
            BuiltinExam::QPrefixBracketed => concat!(
                "Q1 Which vitamin deficiency causes scurvy in adults?\n",
                "[A] Vitamin A [B] Vitamin B12 [C] Vitamin C [D] Vitamin D\n",
                "Q2 Which chamber pumps blood into the aorta?\n",
                "[A] Right atrium [B] Right ventricle [C] Left atrium [D] Left ventricle\n",
            ),
        }
    }

    pub fn answer_key(&self) -> &'static str {
        match self {
            BuiltinExam::ArithmeticAndSky => "1-B,2-B",
            BuiltinExam::BracesWithBoilerplate => "Gabarito: 01-B, 02-A, 03-A",
            BuiltinExam::KeywordHeaders => "CB",
            BuiltinExam::ImageQuestion => "1 A\n2 C\n3 A",
            BuiltinExam::QPrefixBracketed => "1-C, 2-D",
        }
    }

    /// Records a correct extraction produces.
    pub fn expected_count(&self) -> usize {
        match self {
            BuiltinExam::ArithmeticAndSky => 2,
            BuiltinExam::BracesWithBoilerplate => 3,
            BuiltinExam::KeywordHeaders => 2,
            BuiltinExam::ImageQuestion => 3,
            BuiltinExam::QPrefixBracketed => 2,
        }
    }
}

const TOPICS: [&str; 5] = ["anatomy", "pharmacology", "cardiology", "neurology", "pediatrics"];

fn generated_question(number: u32) -> String {
    let topic = TOPICS[number as usize % TOPICS.len()];
    format!(
        "{}. Which statement about {} is correct in this clinical scenario?\n(A) first alternative\n(B) second alternative\n(C) third alternative\n(D) fourth alternative",
        number, topic
    )
}

/// Builds an exam of `count` `N.` questions with four options each.
///
/// Questions listed in `inline` are appended to the previous question's last
/// line instead of starting a new line, the way broken PDF text layers glue
/// them. The only digits in the text are question numbers.
pub fn generate_exam(count: u32, inline: &[u32]) -> String {
    let mut text = String::new();
    for number in 1..=count {
        if number > 1 {
            if inline.contains(&number) {
                text.push(' ');
            } else {
                text.push('\n');
            }
        }
        text.push_str(&generated_question(number));
    }
    text.push('\n');
    text
}

/// Answer key `1-A, 2-B, ...` cycling through `A..D`.
pub fn generate_answer_key(count: u32) -> String {
    (1..=count)
        .map(|n| format!("{}-{}", n, ["A", "B", "C", "D"][(n as usize - 1) % 4]))
        .collect::<Vec<String>>()
        .join(", ")
}
